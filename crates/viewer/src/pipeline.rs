//! The viewer's latest-only frame pipeline (spec §4.3): a single pending
//! slot plus an in-flight flag, no queue. A frame arriving while one is
//! already in flight overwrites the pending slot; whatever was there is
//! unconditionally discarded in favor of the newest.
//!
//! The viewer is single-threaded cooperative (spec §5): this entire state
//! lives inside one task's `run` loop, so no locking is needed around the
//! pending slot or the in-flight flag.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::future::{BoxFuture, FutureExt};
use glint_detector::Detector;
use glint_protocol::{strip_data_uri_prefix, DetectionResult, FrameRequest};
use tokio::sync::mpsc;

use crate::offload::OffloadClient;
use crate::time::now_ms;

#[derive(Clone)]
pub enum DispatchMode {
    Local {
        detector: Arc<Detector>,
        score_threshold: f32,
        nms_iou_threshold: f32,
    },
    Offload {
        client: Arc<OffloadClient>,
    },
}

pub struct FramePipeline {
    mode: DispatchMode,
}

impl FramePipeline {
    pub fn new(mode: DispatchMode) -> Self {
        Self { mode }
    }

    /// Drive the pipeline until `frame_rx` closes, invoking `on_result` for
    /// every produced (or synthesized) Detection Result, in the order
    /// produced (spec §5 ordering guarantee 3).
    pub async fn run(
        self,
        mut frame_rx: mpsc::UnboundedReceiver<FrameRequest>,
        on_result: impl Fn(DetectionResult) + Send + 'static,
    ) {
        let mut in_flight: Option<BoxFuture<'static, DetectionResult>> = None;
        let mut pending: Option<FrameRequest> = None;

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(f) => {
                            if in_flight.is_some() {
                                pending = Some(f);
                            } else {
                                in_flight = Some(dispatch(self.mode.clone(), f));
                            }
                        }
                        None => break,
                    }
                }
                result = async { in_flight.as_mut().unwrap().await }, if in_flight.is_some() => {
                    in_flight = None;
                    on_result(result);
                    if let Some(next) = pending.take() {
                        in_flight = Some(dispatch(self.mode.clone(), next));
                    }
                }
            }
        }
    }
}

const OFFLOAD_TIMEOUT: Duration = Duration::from_millis(200);
const OFFLOAD_INPUT_SIZE: u32 = 640;
const OFFLOAD_JPEG_QUALITY: u8 = 70;

fn dispatch(mode: DispatchMode, frame: FrameRequest) -> BoxFuture<'static, DetectionResult> {
    match mode {
        DispatchMode::Local {
            detector,
            score_threshold,
            nms_iou_threshold,
        } => dispatch_local(detector, score_threshold, nms_iou_threshold, frame).boxed(),
        DispatchMode::Offload { client } => dispatch_offload(client, frame).boxed(),
    }
}

async fn dispatch_local(
    detector: Arc<Detector>,
    score_threshold: f32,
    nms_iou_threshold: f32,
    frame: FrameRequest,
) -> DetectionResult {
    let recv_ts = now_ms();
    let outcome =
        glint_detector::run_pipeline(&detector, &frame.image_data, score_threshold, nms_iou_threshold)
            .await;
    let inference_ts = now_ms();
    match outcome {
        Ok(detections) => DetectionResult {
            frame_id: frame.frame_id,
            capture_ts: frame.capture_ts,
            recv_ts,
            inference_ts,
            detections,
        },
        Err(e) => {
            tracing::warn!(frame_id = %frame.frame_id, "local inference failed: {e}");
            DetectionResult::empty(frame.frame_id, frame.capture_ts, recv_ts, inference_ts)
        }
    }
}

/// Offload mode: resize to 640x640 and re-encode as a moderate-quality JPEG
/// (spec §4.3 "resize to 640x640, re-encode as a moderate-quality lossy
/// image"), then send `process-frame` to the broker and await the matching
/// `detection-result`, applying the 200 ms timeout from spec §4.3. On
/// timeout an empty result is synthesized and the pending correlation is
/// abandoned -- a late reply is simply discarded by `OffloadClient`.
async fn dispatch_offload(client: Arc<OffloadClient>, mut frame: FrameRequest) -> DetectionResult {
    let capture_ts = frame.capture_ts;
    let frame_id = frame.frame_id.clone();

    match resize_and_reencode(&frame.image_data, OFFLOAD_INPUT_SIZE) {
        Ok(image_data) => {
            frame.image_data = image_data;
            frame.width = OFFLOAD_INPUT_SIZE;
            frame.height = OFFLOAD_INPUT_SIZE;
        }
        Err(e) => {
            tracing::warn!(frame_id = %frame_id, "offload resize/re-encode failed, sending original frame: {e}");
        }
    }

    match tokio::time::timeout(OFFLOAD_TIMEOUT, client.process_frame(frame)).await {
        Ok(result) => result,
        Err(_) => {
            client.abandon(&frame_id).await;
            let now = now_ms();
            DetectionResult::empty(frame_id, capture_ts, now, now)
        }
    }
}

/// Decode, resize to `size x size`, and re-encode as a moderate-quality
/// JPEG data URI -- the same decode/resize shape as `glint_detector`'s
/// preprocessing step, reused here for the offload wire payload instead of
/// a tensor.
fn resize_and_reencode(image_data: &str, size: u32) -> anyhow::Result<String> {
    let raw_b64 = strip_data_uri_prefix(image_data);
    let bytes = base64::engine::general_purpose::STANDARD.decode(raw_b64)?;
    let img = image::load_from_memory(&bytes)?;
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let mut jpeg_bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, OFFLOAD_JPEG_QUALITY)
        .encode_image(&rgb)?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg_bytes);
    Ok(format!("data:image/jpeg;base64,{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_only_drops_superseded_pending_frames() {
        // A burst of frames while one dispatch is slow should collapse to
        // exactly first + last processed, per spec §8 "Viewer overflow".
        let (tx, rx) = mpsc::unbounded_channel();
        let processed = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let processed_clone = Arc::clone(&processed);

        // A fake offload client whose `process_frame` takes a fixed delay,
        // long enough that a burst collapses into the pending slot.
        let client = OffloadClient::new_test_slow(Duration::from_millis(50));
        let pipeline = FramePipeline::new(DispatchMode::Offload { client });

        let handle = tokio::spawn(pipeline.run(rx, move |result| {
            let processed = Arc::clone(&processed_clone);
            tokio::spawn(async move {
                processed.lock().await.push(result.frame_id);
            });
        }));

        for i in 0..100 {
            tx.send(FrameRequest {
                room: "r".to_string(),
                frame_id: format!("f{i}"),
                capture_ts: i as u64,
                width: 640,
                height: 640,
                image_data: "data:image/jpeg;base64,AAAA".to_string(),
            })
            .unwrap();
        }
        drop(tx);

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.abort();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let results = processed.lock().await;
        assert_eq!(results.first().map(String::as_str), Some("f0"));
        assert_eq!(results.last().map(String::as_str), Some("f99"));
    }
}
