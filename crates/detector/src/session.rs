//! ONNX Runtime session wrapper with lazy/eager load and a restart-tolerant
//! lifecycle (spec §4.2, §6.5; ambient stack §1 "Model lifecycle").

use std::sync::Arc;
use std::time::Instant;

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::postprocess::RawDetection;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("model not loaded yet (lazy_load is enabled, call initialize() first)")]
    NotLoaded,
    #[error("model load previously failed: {0}")]
    LoadFailed(String),
    #[error("onnxruntime error: {0}")]
    Ort(#[from] ort::Error),
}

enum ModelState {
    Unloaded,
    Ready(Arc<Session>),
    Failed(String),
}

/// Owns the ONNX Runtime session for the fixed `[1,3,size,size] -> [1,N,6]`
/// detector model (spec §6.5). One `Detector` is shared process-wide; calls
/// serialize through the enclosing `RwLock` the way the teacher serializes
/// access to shared session/display resources.
pub struct Detector {
    model_path: String,
    input_size: u32,
    state: RwLock<ModelState>,
}

impl Detector {
    pub fn new(model_path: impl Into<String>, input_size: u32, lazy_load: bool) -> Arc<Self> {
        let detector = Arc::new(Self {
            model_path: model_path.into(),
            input_size,
            state: RwLock::new(ModelState::Unloaded),
        });
        if !lazy_load {
            let d = detector.clone();
            tokio::spawn(async move {
                if let Err(e) = d.initialize().await {
                    warn!(error = %e, "eager model load failed at startup");
                }
            });
        }
        detector
    }

    /// Idempotent: a second call while already `Ready` is a no-op: a second
    /// call after a `Failed` state retries (the failure is not cached
    /// forever, only until the next explicit initialize request, per spec
    /// §4.2's lazy-load retry semantics).
    pub async fn initialize(&self) -> Result<u64, DetectorError> {
        {
            let state = self.state.read().await;
            if let ModelState::Ready(_) = &*state {
                return Ok(0);
            }
        }

        let mut state = self.state.write().await;
        if let ModelState::Ready(_) = &*state {
            return Ok(0);
        }

        let started = Instant::now();
        match Session::builder()
            .and_then(|b| b.commit_from_file(&self.model_path))
        {
            Ok(session) => {
                let load_time_ms = started.elapsed().as_millis() as u64;
                info!(model = %self.model_path, load_time_ms, "model loaded");
                *state = ModelState::Ready(Arc::new(session));
                Ok(load_time_ms)
            }
            Err(e) => {
                let msg = e.to_string();
                *state = ModelState::Failed(msg.clone());
                Err(DetectorError::LoadFailed(msg))
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.read().await, ModelState::Ready(_))
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Run inference on a preprocessed tensor, returning raw `[xmin, ymin,
    /// xmax, ymax, score, class_id]` rows (spec §6.5).
    pub async fn infer(&self, tensor: Array4<f32>) -> Result<Vec<RawDetection>, DetectorError> {
        let session = {
            match &*self.state.read().await {
                ModelState::Ready(session) => session.clone(),
                ModelState::Failed(msg) => return Err(DetectorError::LoadFailed(msg.clone())),
                ModelState::Unloaded => return Err(DetectorError::NotLoaded),
            }
        };

        let input_name = session.inputs[0].name.clone();
        let input_value = Tensor::from_array(tensor)?;
        let outputs = session.run(ort::inputs![input_name.as_str() => input_value])?;
        let output_name = session.outputs[0].name.clone();
        let (shape, data) = outputs[output_name.as_str()].try_extract_raw_tensor::<f32>()?;

        let row_len = 6usize;
        let n = shape.last().copied().unwrap_or(0) as usize / row_len.max(1);
        let rows = if shape.len() >= 2 && *shape.get(shape.len() - 1).unwrap_or(&0) == row_len as i64
        {
            shape[shape.len() - 2] as usize
        } else {
            n
        };

        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            let base = i * row_len;
            if base + row_len > data.len() {
                break;
            }
            out.push(RawDetection {
                xmin: data[base],
                ymin: data[base + 1],
                xmax: data[base + 2],
                ymax: data[base + 3],
                score: data[base + 4],
                class_id: data[base + 5] as i64,
            });
        }
        Ok(out)
    }
}
