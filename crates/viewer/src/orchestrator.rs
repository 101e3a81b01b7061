//! Viewer state machine (spec §4.3): owns one room's peer-to-peer session
//! end to end, from control-connection open through SDP negotiation to
//! the detection pipeline, and reports telemetry to a UI collaborator.

use std::sync::Arc;
use std::time::Duration;

use glint_detector::Detector;
use glint_protocol::{DetectionResult, FrameRequest, Role, SignalingMessage};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use crate::offload::OffloadClient;
use crate::peer::{IceServerConfig, WebRtcPeer};
use crate::pipeline::{DispatchMode, FramePipeline};
use crate::telemetry::{BandwidthSampler, BandwidthStats, LatencyRing, LatencyStats};
use crate::time::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Idle,
    Connecting,
    WaitingForPeer,
    Offering,
    Negotiating,
    Connected,
    Detecting,
    Closed,
}

pub struct OrchestratorConfig {
    pub server_url: String,
    pub room: String,
    pub mode: DetectionMode,
    pub ice_servers: Vec<IceServerConfig>,
    /// Cap on signaling-connect attempts before giving up permanently
    /// (spec §6.4 "exit code 1 on precondition failure"). `None` means
    /// retry forever, which is what the long-running viewer binary wants.
    pub connect_attempt_limit: Option<u32>,
}

#[derive(Clone)]
pub enum DetectionMode {
    Local {
        detector: Arc<Detector>,
        score_threshold: f32,
        nms_iou_threshold: f32,
    },
    Offload,
}

/// Collaborator callback, invoked after every Detection Result with the
/// up-to-date derived telemetry (spec §4.3 "emit all derived values to
/// the UI collaborator").
pub trait Telemetry: Send + Sync {
    fn on_result(&self, result: &DetectionResult, latency: LatencyStats, bandwidth: BandwidthStats);
    fn on_state_change(&self, _state: ViewerState) {}
}

const BANDWIDTH_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Shared, lock-protected telemetry rings. The viewer is single-threaded
/// cooperative per spec §5, but the result-handling closure and the
/// bandwidth poll task both append to these, so a lightweight mutex
/// replaces the "no locking required" pending-slot discipline here.
#[derive(Default)]
struct TelemetryRings {
    latency: LatencyRing,
    bandwidth: BandwidthSampler,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    state: ViewerState,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            state: ViewerState::Idle,
        }
    }

    fn transition(&mut self, next: ViewerState, telemetry: &dyn Telemetry) {
        info!(from = ?self.state, to = ?next, "viewer state transition");
        self.state = next;
        telemetry.on_state_change(next);
    }

    /// Run the full session until the control connection closes or
    /// `shutdown_rx` fires. Drives every transition in the spec §4.3 state
    /// table in sequence; returns once the session reaches `Closed`.
    ///
    /// `connect_failure_tx`, if given, receives the error once the
    /// signaling connection gives up permanently (only possible when
    /// `connect_attempt_limit` is set) -- the standalone viewer passes
    /// `None` and retries forever; `bench` passes a sender so it can map
    /// an unreachable server to exit code 1.
    pub async fn run(
        mut self,
        telemetry: Arc<dyn Telemetry>,
        mut shutdown_rx: mpsc::Receiver<()>,
        mut connect_failure_tx: Option<oneshot::Sender<anyhow::Error>>,
    ) {
        self.transition(ViewerState::Connecting, telemetry.as_ref());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SignalingMessage>();

        let server_url = self.config.server_url.clone();
        let max_attempts = self.config.connect_attempt_limit;
        let mut signaling_task = tokio::spawn(crate::signaling::run_signaling(
            server_url,
            outbound_rx,
            event_tx,
            max_attempts,
        ));

        let _ = outbound_tx.send(SignalingMessage::JoinRoom {
            room: self.config.room.clone(),
            role: Role::Viewer,
        });
        self.transition(ViewerState::WaitingForPeer, telemetry.as_ref());

        let peer: Arc<Mutex<Option<Arc<WebRtcPeer>>>> = Arc::new(Mutex::new(None));
        let offload_client = match &self.config.mode {
            DetectionMode::Offload => {
                Some(OffloadClient::new(self.config.room.clone(), outbound_tx.clone()))
            }
            DetectionMode::Local { .. } => None,
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<FrameRequest>();
        let dispatch_mode = match &self.config.mode {
            DetectionMode::Local {
                detector,
                score_threshold,
                nms_iou_threshold,
            } => DispatchMode::Local {
                detector: Arc::clone(detector),
                score_threshold: *score_threshold,
                nms_iou_threshold: *nms_iou_threshold,
            },
            DetectionMode::Offload => DispatchMode::Offload {
                client: Arc::clone(offload_client.as_ref().unwrap()),
            },
        };

        let rings = Arc::new(Mutex::new(TelemetryRings::default()));

        let bandwidth_peer = Arc::clone(&peer);
        let bandwidth_rings = Arc::clone(&rings);
        let bandwidth_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(BANDWIDTH_POLL_INTERVAL);
            loop {
                tick.tick().await;
                let Some(p) = bandwidth_peer.lock().await.clone() else { continue };
                let (sent, received) = p.transport_bytes().await;
                bandwidth_rings.lock().await.bandwidth.record(now_ms(), sent, received);
            }
        });

        let pipeline_peer = Arc::clone(&peer);
        let pipeline_rings = Arc::clone(&rings);
        let pipeline_telemetry = Arc::clone(&telemetry);
        let pipeline = FramePipeline::new(dispatch_mode);
        let pipeline_task = tokio::spawn(async move {
            pipeline
                .run(frame_rx, move |result| {
                    let peer = Arc::clone(&pipeline_peer);
                    let rings = Arc::clone(&pipeline_rings);
                    let telemetry = Arc::clone(&pipeline_telemetry);
                    tokio::spawn(async move {
                        let now = now_ms();
                        let e2e_latency_ms = now.saturating_sub(result.capture_ts) as f64;

                        let (latency, bandwidth) = {
                            let mut rings = rings.lock().await;
                            rings.latency.push(e2e_latency_ms);
                            (rings.latency.stats(), rings.bandwidth.stats())
                        };

                        if let Ok(json) = serde_json::to_string(&result) {
                            if let Some(p) = peer.lock().await.as_ref() {
                                p.send_result(&json).await;
                            }
                        }

                        telemetry.on_result(&result, latency, bandwidth);
                    });
                })
                .await;
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested");
                    break;
                }
                msg = event_rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_event(
                        msg,
                        &outbound_tx,
                        &peer,
                        &frame_tx,
                        offload_client.as_ref(),
                        telemetry.as_ref(),
                    ).await;
                }
                res = &mut signaling_task => {
                    match res {
                        Ok(Err(e)) => {
                            warn!("signaling connection failed permanently: {e:#}");
                            if let Some(tx) = connect_failure_tx.take() {
                                let _ = tx.send(e);
                            }
                        }
                        Ok(Ok(())) => info!("signaling task exited cleanly"),
                        Err(e) => warn!("signaling task panicked: {e}"),
                    }
                    break;
                }
            }
        }

        self.transition(ViewerState::Closed, telemetry.as_ref());
        if let Some(p) = peer.lock().await.as_ref() {
            let _ = p.close().await;
        }
        drop(outbound_tx);
        drop(frame_tx);
        signaling_task.abort();
        pipeline_task.abort();
        bandwidth_task.abort();
    }

    async fn handle_event(
        &mut self,
        msg: SignalingMessage,
        outbound_tx: &mpsc::UnboundedSender<SignalingMessage>,
        peer: &Arc<Mutex<Option<Arc<WebRtcPeer>>>>,
        frame_tx: &mpsc::UnboundedSender<FrameRequest>,
        offload_client: Option<&Arc<OffloadClient>>,
        telemetry: &dyn Telemetry,
    ) {
        match msg {
            SignalingMessage::PeerJoined { role: Role::Capture, .. } => {
                if self.state != ViewerState::WaitingForPeer {
                    return;
                }
                self.transition(ViewerState::Offering, telemetry);
                if self.create_offer(outbound_tx, peer, frame_tx).await {
                    self.transition(ViewerState::Negotiating, telemetry);
                }
            }
            SignalingMessage::Answer { answer, .. } => {
                if self.state != ViewerState::Negotiating {
                    return;
                }
                let Some(p) = peer.lock().await.clone() else { return };
                let sdp = answer.get("sdp").and_then(|v| v.as_str()).unwrap_or_default();
                if let Err(e) = p.handle_answer(sdp).await {
                    warn!("failed to apply answer: {e}");
                    return;
                }
                // Transport establishment is asynchronous (ICE still needs
                // to complete); this system treats "answer applied" as
                // transport-established for simplicity, matching the
                // teacher's peer which never blocks on `is_connected()`
                // before proceeding.
                self.transition(ViewerState::Connected, telemetry);
                self.transition(ViewerState::Detecting, telemetry);
            }
            SignalingMessage::IceCandidate { candidate, .. } => {
                let Some(p) = peer.lock().await.clone() else { return };
                let candidate_str = candidate.get("candidate").and_then(|v| v.as_str()).unwrap_or_default();
                let sdp_mid = candidate.get("sdpMid").and_then(|v| v.as_str()).map(str::to_string);
                let sdp_mline_index = candidate.get("sdpMLineIndex").and_then(|v| v.as_u64()).map(|n| n as u16);
                if let Err(e) = p.add_ice_candidate(candidate_str, sdp_mid.as_deref(), sdp_mline_index).await {
                    warn!("failed to add ICE candidate: {e}");
                }
            }
            SignalingMessage::PeerLeft { role: Role::Capture, .. } => {
                info!("capture peer left, returning to waiting-for-peer");
                *peer.lock().await = None;
                if let Some(client) = offload_client {
                    client.cancel_all().await;
                }
                self.transition(ViewerState::WaitingForPeer, telemetry);
            }
            SignalingMessage::DetectionResult { frame_id, capture_ts, recv_ts, inference_ts, detections } => {
                if let Some(client) = offload_client {
                    client
                        .resolve(DetectionResult { frame_id, capture_ts, recv_ts, inference_ts, detections })
                        .await;
                }
            }
            SignalingMessage::ProcessingError { error } => {
                warn!("processing error from engine: {error}");
            }
            _ => {}
        }
    }

    /// Build the peer, wire its callbacks, and send the offer. Returns
    /// `true` on success so the caller can advance to Negotiating.
    async fn create_offer(
        &self,
        outbound_tx: &mpsc::UnboundedSender<SignalingMessage>,
        peer: &Arc<Mutex<Option<Arc<WebRtcPeer>>>>,
        frame_tx: &mpsc::UnboundedSender<FrameRequest>,
    ) -> bool {
        let new_peer = match WebRtcPeer::new(self.config.ice_servers.clone()).await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!("failed to create peer connection: {e}");
                return false;
            }
        };

        let outbound_for_ice = outbound_tx.clone();
        let room = self.config.room.clone();
        new_peer.on_ice_candidate(move |candidate, sdp_mid, sdp_mline_index| {
            let candidate_json = serde_json::json!({
                "candidate": candidate,
                "sdpMid": sdp_mid,
                "sdpMLineIndex": sdp_mline_index,
            });
            let _ = outbound_for_ice.send(SignalingMessage::IceCandidate {
                room: room.clone(),
                candidate: candidate_json,
                from: None,
            });
        });

        let frame_tx = frame_tx.clone();
        new_peer
            .on_frame(move |bytes| {
                if let Ok(frame) = serde_json::from_slice::<FrameRequest>(&bytes) {
                    let _ = frame_tx.send(frame);
                }
            })
            .await;

        *peer.lock().await = Some(Arc::clone(&new_peer));

        match new_peer.create_offer().await {
            Ok(sdp) => {
                let _ = outbound_tx.send(SignalingMessage::Offer {
                    room: self.config.room.clone(),
                    offer: serde_json::json!({ "type": "offer", "sdp": sdp }),
                    from: None,
                });
                true
            }
            Err(e) => {
                warn!("failed to create offer: {e}");
                false
            }
        }
    }
}
