//! The deterministic preprocessing -> inference -> postprocessing pipeline
//! shared by the broker's Inference Engine and the viewer's local dispatch
//! mode (spec §4.2).

pub mod postprocess;
pub mod preprocess;
pub mod session;

pub use postprocess::{postprocess, RawDetection};
pub use preprocess::{preprocess, PreprocessError, PreprocessedFrame};
pub use session::{Detector, DetectorError};

use glint_protocol::Detection;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// Run the full pipeline end to end: decode/resize/tensorize, infer, then
/// filter/normalize/NMS, returning the detections for one frame.
pub async fn run_pipeline(
    detector: &Detector,
    image_data: &str,
    score_threshold: f32,
    nms_iou_threshold: f32,
) -> Result<Vec<Detection>, PipelineError> {
    let size = detector.input_size();
    let frame = preprocess(image_data, size)?;
    let raw = detector.infer(frame.tensor).await?;
    Ok(postprocess(&raw, size, score_threshold, nms_iou_threshold))
}
