//! Offload-mode correlation: matches outgoing `process-frame` requests to
//! their `detection-result` reply by `frame_id`, so the pipeline can
//! `.await` a specific frame's result instead of racing every inbound
//! message against every in-flight request.

use std::collections::HashMap;
use std::sync::Arc;

use glint_protocol::{DetectionResult, FrameRequest, SignalingMessage};
use tokio::sync::{mpsc, oneshot, Mutex};

enum Backend {
    Real {
        outbound: mpsc::UnboundedSender<SignalingMessage>,
        room: String,
    },
    /// Test-only stand-in that answers every frame after a fixed delay,
    /// without a real broker connection, for pipeline backpressure tests.
    #[cfg(test)]
    TestSlow { delay: std::time::Duration },
}

pub struct OffloadClient {
    backend: Backend,
    pending: Mutex<HashMap<String, oneshot::Sender<DetectionResult>>>,
}

impl OffloadClient {
    pub fn new(room: String, outbound: mpsc::UnboundedSender<SignalingMessage>) -> Arc<Self> {
        Arc::new(Self {
            backend: Backend::Real { outbound, room },
            pending: Mutex::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    pub fn new_test_slow(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            backend: Backend::TestSlow { delay },
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Send the frame to the broker and await the matching result. The
    /// caller (the pipeline's `dispatch_offload`) applies the 200 ms
    /// timeout and calls `abandon` if it fires.
    pub async fn process_frame(&self, frame: FrameRequest) -> DetectionResult {
        match &self.backend {
            Backend::Real { outbound, room } => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().await.insert(frame.frame_id.clone(), tx);

                let msg = SignalingMessage::ProcessFrame {
                    room: room.clone(),
                    frame_id: frame.frame_id.clone(),
                    capture_ts: frame.capture_ts,
                    width: frame.width,
                    height: frame.height,
                    image_data: frame.image_data,
                };
                if outbound.send(msg).is_err() {
                    self.pending.lock().await.remove(&frame.frame_id);
                    let now = crate::time::now_ms();
                    return DetectionResult::empty(frame.frame_id, frame.capture_ts, now, now);
                }

                match rx.await {
                    Ok(result) => result,
                    Err(_) => {
                        let now = crate::time::now_ms();
                        DetectionResult::empty(frame.frame_id, frame.capture_ts, now, now)
                    }
                }
            }
            #[cfg(test)]
            Backend::TestSlow { delay } => {
                tokio::time::sleep(*delay).await;
                let now = crate::time::now_ms();
                DetectionResult::empty(frame.frame_id, frame.capture_ts, now, now)
            }
        }
    }

    /// Drop a pending correlation after its timeout fires, so a reply that
    /// arrives afterward is discarded instead of resolved (spec §4.3, §5
    /// "late reply is discarded").
    pub async fn abandon(&self, frame_id: &str) {
        self.pending.lock().await.remove(frame_id);
    }

    /// Called by the signaling read loop on every inbound `detection-result`.
    pub async fn resolve(&self, result: DetectionResult) {
        if let Some(tx) = self.pending.lock().await.remove(&result.frame_id) {
            let _ = tx.send(result);
        }
    }

    /// Terminate every in-flight offload await immediately with an empty
    /// result (spec §5 "peer-left terminates any in-flight offload awaits
    /// immediately with an empty result").
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (frame_id, tx) in pending.drain() {
            let now = crate::time::now_ms();
            let _ = tx.send(DetectionResult::empty(frame_id, now, now, now));
        }
    }
}
