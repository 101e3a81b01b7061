//! Detection data model (spec §3): a scored, labeled, normalized bounding
//! box, and the result envelope an inference pass produces.

use serde::{Deserialize, Serialize};

/// Number of classes in the fixed COCO-80 catalogue the detector reports
/// against (spec §6.5).
pub const NUM_CLASSES: usize = 80;

/// The 80-entry COCO class catalogue, index = class-id.
pub const COCO_CLASSES: [&str; NUM_CLASSES] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("class-id {0} out of range (0..{NUM_CLASSES})")]
    BadClassId(i64),
    #[error("degenerate box: xmin={xmin} xmax={xmax} ymin={ymin} ymax={ymax}")]
    DegenerateBox {
        xmin: f32,
        ymin: f32,
        xmax: f32,
        ymax: f32,
    },
}

/// A single scored, labeled, normalized axis-aligned bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Detection {
    /// Build from a class-id + raw box, validating the invariants from §3:
    /// coordinates normalized to [0,1], xmax > xmin, ymax > ymin.
    pub fn new(
        class_id: usize,
        score: f32,
        xmin: f32,
        ymin: f32,
        xmax: f32,
        ymax: f32,
    ) -> Result<Self, DetectionError> {
        let class = COCO_CLASSES
            .get(class_id)
            .ok_or(DetectionError::BadClassId(class_id as i64))?;

        let xmin = xmin.clamp(0.0, 1.0);
        let ymin = ymin.clamp(0.0, 1.0);
        let xmax = xmax.clamp(0.0, 1.0);
        let ymax = ymax.clamp(0.0, 1.0);

        if xmax <= xmin || ymax <= ymin {
            return Err(DetectionError::DegenerateBox {
                xmin,
                ymin,
                xmax,
                ymax,
            });
        }
        Ok(Self {
            class: class.to_string(),
            score,
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// Intersection-over-union against another box, with an epsilon in the
    /// denominator to avoid division by zero (spec §4.2 step 5).
    pub fn iou(&self, other: &Detection) -> f32 {
        const EPS: f32 = 1e-6;
        let ix0 = self.xmin.max(other.xmin);
        let iy0 = self.ymin.max(other.ymin);
        let ix1 = self.xmax.min(other.xmax);
        let iy1 = self.ymax.min(other.ymax);
        let iw = (ix1 - ix0).max(0.0);
        let ih = (iy1 - iy0).max(0.0);
        let intersection = iw * ih;
        let area_a = (self.xmax - self.xmin) * (self.ymax - self.ymin);
        let area_b = (other.xmax - other.xmin) * (other.ymax - other.ymin);
        intersection / (area_a + area_b - intersection + EPS)
    }
}

/// A frame-inference request: the fields a capture peer attaches to an
/// encoded image (spec §3 "Frame Request").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRequest {
    pub room: String,
    pub frame_id: String,
    pub capture_ts: u64,
    pub width: u32,
    pub height: u32,
    /// Data-URI-prefixed base64 JPEG (or equivalent self-describing encoding).
    #[serde(rename = "imageData")]
    pub image_data: String,
}

/// The ordered outcome of running the detector on a `FrameRequest`
/// (spec §3 "Detection Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub frame_id: String,
    pub capture_ts: u64,
    pub recv_ts: u64,
    pub inference_ts: u64,
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    /// An empty result used by the viewer's offload timeout synthesis and
    /// by local-mode zero-detection frames.
    pub fn empty(frame_id: impl Into<String>, capture_ts: u64, recv_ts: u64, inference_ts: u64) -> Self {
        Self {
            frame_id: frame_id.into(),
            capture_ts,
            recv_ts,
            inference_ts,
            detections: Vec::new(),
        }
    }

    /// Checks the monotonic timestamp invariant from §3/§8:
    /// `capture_ts <= recv_ts <= inference_ts`.
    pub fn has_monotonic_timestamps(&self) -> bool {
        self.capture_ts <= self.recv_ts && self.recv_ts <= self.inference_ts
    }
}

/// Strip a `data:image/...;base64,` prefix if present (spec §4.2 step 1).
pub fn strip_data_uri_prefix(data: &str) -> &str {
    match data.find(",") {
        Some(idx) if data.starts_with("data:") => &data[idx + 1..],
        _ => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_rejects_bad_class_id() {
        let err = Detection::new(NUM_CLASSES, 0.9, 0.1, 0.1, 0.5, 0.5).unwrap_err();
        assert!(matches!(err, DetectionError::BadClassId(80)));
    }

    #[test]
    fn detection_rejects_degenerate_box() {
        let err = Detection::new(0, 0.9, 0.5, 0.5, 0.5, 0.9).unwrap_err();
        assert!(matches!(err, DetectionError::DegenerateBox { .. }));
    }

    #[test]
    fn detection_clamps_to_unit_square() {
        let d = Detection::new(0, 0.9, -0.1, -0.1, 1.1, 1.1).unwrap();
        assert_eq!(d.xmin, 0.0);
        assert_eq!(d.ymin, 0.0);
        assert_eq!(d.xmax, 1.0);
        assert_eq!(d.ymax, 1.0);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = Detection::new(0, 0.9, 0.1, 0.1, 0.5, 0.5).unwrap();
        let b = a.clone();
        assert!((a.iou(&b) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = Detection::new(0, 0.9, 0.0, 0.0, 0.2, 0.2).unwrap();
        let b = Detection::new(0, 0.8, 0.5, 0.5, 0.7, 0.7).unwrap();
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_edge_case_iou_above_threshold() {
        // From spec §8 scenario 5: 0.92 overlap should exceed the 0.5 threshold.
        let a = Detection::new(0, 0.9, 0.1, 0.1, 0.5, 0.5).unwrap();
        let b = Detection::new(0, 0.8, 0.11, 0.11, 0.51, 0.51).unwrap();
        assert!(a.iou(&b) > 0.5);
    }

    #[test]
    fn detection_result_monotonic_timestamps() {
        let good = DetectionResult::empty("f1", 1000, 1005, 1010);
        assert!(good.has_monotonic_timestamps());
        let bad = DetectionResult {
            frame_id: "f1".to_string(),
            capture_ts: 1000,
            recv_ts: 999,
            inference_ts: 1010,
            detections: vec![],
        };
        assert!(!bad.has_monotonic_timestamps());
    }

    #[test]
    fn strip_data_uri_prefix_removes_prefix() {
        assert_eq!(
            strip_data_uri_prefix("data:image/jpeg;base64,AAAA"),
            "AAAA"
        );
    }

    #[test]
    fn strip_data_uri_prefix_passthrough_when_absent() {
        assert_eq!(strip_data_uri_prefix("AAAA"), "AAAA");
    }
}
