//! The Inference Engine (spec §4.2): a per-room throttle in front of a
//! single background worker that owns the shared `Detector` and serializes
//! every inference call, so the WebSocket transport handler never blocks
//! (grounded in the teacher's "spawn a background task" shape used for
//! agent process spawning and session monitoring in `web.rs`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use glint_detector::Detector;
use glint_protocol::{DetectionResult, FrameRequest, SignalingMessage};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::time::now_ms;

struct RoomThrottle {
    last_accepted_ms: Mutex<HashMap<String, u64>>,
    min_interframe_ms: u64,
}

impl RoomThrottle {
    fn new(min_interframe_ms: u64) -> Self {
        Self {
            last_accepted_ms: Mutex::new(HashMap::new()),
            min_interframe_ms,
        }
    }

    /// True if a frame arriving `now_ms` for `room` is at least
    /// `min_interframe_ms` after the last accepted frame (spec §4.2).
    fn should_accept(&self, room: &str, now_ms: u64) -> bool {
        let mut map = self.last_accepted_ms.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(room) {
            Some(&last) if now_ms.saturating_sub(last) < self.min_interframe_ms => false,
            _ => {
                map.insert(room.to_string(), now_ms);
                true
            }
        }
    }
}

#[derive(Default)]
pub struct EngineMetrics {
    pub frames_accepted: AtomicU64,
    pub frames_throttled: AtomicU64,
    pub frames_failed: AtomicU64,
}

struct FrameJob {
    frame: FrameRequest,
    recv_ts: u64,
    reply: broadcast::Sender<SignalingMessage>,
}

/// Handle used by the signaling layer to hand off frames. Cheap to clone,
/// cloning just clones the `mpsc::Sender`.
pub struct Engine {
    tx: mpsc::Sender<FrameJob>,
    throttle: RoomThrottle,
    pub metrics: Arc<EngineMetrics>,
}

impl Engine {
    pub fn spawn(
        detector: Arc<Detector>,
        score_threshold: f32,
        nms_iou_threshold: f32,
        min_interframe_ms: u64,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<FrameJob>(256);
        let metrics = Arc::new(EngineMetrics::default());
        let worker_metrics = Arc::clone(&metrics);
        tokio::spawn(worker_loop(rx, detector, score_threshold, nms_iou_threshold, worker_metrics));

        Arc::new(Self {
            tx,
            throttle: RoomThrottle::new(min_interframe_ms),
            metrics,
        })
    }

    /// Enqueue a frame for inference. Returns `false` if the room is
    /// throttled or the worker's queue is full (both non-fatal: the caller
    /// simply gets no `DetectionResult` for this frame).
    pub fn submit(&self, room: &str, frame: FrameRequest, reply: broadcast::Sender<SignalingMessage>) -> bool {
        let recv_ts = now_ms();
        if !self.throttle.should_accept(room, recv_ts) {
            self.metrics.frames_throttled.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.tx.try_send(FrameJob { frame, recv_ts, reply }) {
            Ok(()) => {
                self.metrics.frames_accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!("engine queue full, dropping frame: {e}");
                self.metrics.frames_failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<FrameJob>,
    detector: Arc<Detector>,
    score_threshold: f32,
    nms_iou_threshold: f32,
    metrics: Arc<EngineMetrics>,
) {
    while let Some(job) = rx.recv().await {
        let inference_ts = now_ms();
        let outcome = glint_detector::run_pipeline(
            &detector,
            &job.frame.image_data,
            score_threshold,
            nms_iou_threshold,
        )
        .await;

        let msg = match outcome {
            Ok(detections) => SignalingMessage::DetectionResult {
                frame_id: job.frame.frame_id.clone(),
                capture_ts: job.frame.capture_ts,
                recv_ts: job.recv_ts,
                inference_ts,
                detections,
            },
            Err(e) => {
                metrics.frames_failed.fetch_add(1, Ordering::Relaxed);
                SignalingMessage::ProcessingError { error: e.to_string() }
            }
        };

        if job.reply.send(msg).is_err() {
            tracing::debug!(frame_id = %job.frame.frame_id, "no receiver for detection result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_rejects_frames_within_window() {
        let throttle = RoomThrottle::new(100);
        assert!(throttle.should_accept("r1", 1000));
        assert!(!throttle.should_accept("r1", 1050));
        assert!(throttle.should_accept("r1", 1100));
    }

    #[test]
    fn throttle_is_independent_per_room() {
        let throttle = RoomThrottle::new(100);
        assert!(throttle.should_accept("r1", 1000));
        assert!(throttle.should_accept("r2", 1010));
    }
}
