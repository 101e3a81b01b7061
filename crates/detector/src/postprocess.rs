//! Score/class filter, coordinate normalization, degenerate-box drop,
//! score-descending sort and NMS (spec §4.2 steps 5-6).

use glint_protocol::Detection;

/// Raw model output row: `[xmin, ymin, xmax, ymax, score, class_id]` in
/// pixel space over the `size x size` input the tensor was built at
/// (spec §6.5 output shape `[1,N,6]`).
pub struct RawDetection {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub score: f32,
    pub class_id: i64,
}

/// Step 5-6 of spec §4.2: filter by `score_threshold`, normalize
/// coordinates into `[0,1]` against `input_size`, drop degenerate/
/// out-of-range boxes, sort by descending score, then run NMS at
/// `iou_threshold`.
pub fn postprocess(
    raw: &[RawDetection],
    input_size: u32,
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    let scale = input_size as f32;

    let mut candidates: Vec<Detection> = raw
        .iter()
        .filter(|r| r.score >= score_threshold)
        .filter_map(|r| {
            let class_id = usize::try_from(r.class_id).ok()?;
            Detection::new(
                class_id,
                r.score,
                r.xmin / scale,
                r.ymin / scale,
                r.xmax / scale,
                r.ymax / scale,
            )
            .ok()
        })
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    non_max_suppression(candidates, iou_threshold)
}

/// Greedy NMS: repeatedly take the highest-scoring remaining box, then
/// drop every other box whose IoU against it exceeds `iou_threshold`
/// (spec §4.2 step 6, §8 scenario 5).
fn non_max_suppression(sorted_by_score_desc: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut kept: Vec<Detection> = Vec::new();
    let mut remaining = sorted_by_score_desc;

    while !remaining.is_empty() {
        let best = remaining.remove(0);
        remaining.retain(|d| best.iou(d) <= iou_threshold);
        kept.push(best);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(xmin: f32, ymin: f32, xmax: f32, ymax: f32, score: f32, class_id: i64) -> RawDetection {
        RawDetection {
            xmin,
            ymin,
            xmax,
            ymax,
            score,
            class_id,
        }
    }

    #[test]
    fn filters_below_score_threshold() {
        let raw = vec![raw(10.0, 10.0, 100.0, 100.0, 0.2, 0)];
        let out = postprocess(&raw, 640, 0.45, 0.5);
        assert!(out.is_empty());
    }

    #[test]
    fn drops_degenerate_and_bad_class_boxes() {
        let raw = vec![
            raw(100.0, 100.0, 50.0, 50.0, 0.9, 0), // degenerate
            raw(10.0, 10.0, 100.0, 100.0, 0.9, 999), // bad class
        ];
        let out = postprocess(&raw, 640, 0.45, 0.5);
        assert!(out.is_empty());
    }

    #[test]
    fn normalizes_coordinates_against_input_size() {
        let raw = vec![raw(64.0, 64.0, 320.0, 320.0, 0.9, 0)];
        let out = postprocess(&raw, 640, 0.45, 0.5);
        assert_eq!(out.len(), 1);
        assert!((out[0].xmin - 0.1).abs() < 1e-5);
        assert!((out[0].xmax - 0.5).abs() < 1e-5);
    }

    #[test]
    fn nms_suppresses_heavily_overlapping_lower_score_box() {
        // Same overlap as the protocol crate's edge-case test (IoU ~0.92 > 0.5).
        let raw = vec![
            raw(64.0, 64.0, 320.0, 320.0, 0.9, 0),
            raw(70.0, 70.0, 326.0, 326.0, 0.8, 0),
        ];
        let out = postprocess(&raw, 640, 0.45, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.9);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let raw = vec![
            raw(0.0, 0.0, 128.0, 128.0, 0.9, 0),
            raw(320.0, 320.0, 448.0, 448.0, 0.8, 1),
        ];
        let out = postprocess(&raw, 640, 0.45, 0.5);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn output_is_sorted_by_descending_score() {
        let raw = vec![
            raw(0.0, 0.0, 64.0, 64.0, 0.5, 0),
            raw(100.0, 100.0, 164.0, 164.0, 0.95, 1),
            raw(200.0, 200.0, 264.0, 264.0, 0.7, 2),
        ];
        let out = postprocess(&raw, 640, 0.45, 0.5);
        assert_eq!(out.len(), 3);
        assert!(out[0].score >= out[1].score);
        assert!(out[1].score >= out[2].score);
    }
}
