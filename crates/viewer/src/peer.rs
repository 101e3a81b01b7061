//! WebRTC peer wrapper for the viewer orchestrator, grounded in the
//! teacher's `agent::peer::WebRTCPeer`. Where the teacher carries H.264
//! video and Opus audio tracks, this peer carries two data channels
//! instead: `frames` (capture -> viewer, Frame Requests) and `results`
//! (viewer -> capture, Detection Results) -- this system moves JPEG
//! frames and JSON detections, not RTP media.
//!
//! Direction is inverted from the teacher too: there the browser offers
//! and the agent answers; here the viewer always creates the offer and
//! the capture peer answers (Design Note, SPEC_FULL.md §4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReport;

/// Monotonic generation counter, bumped every time a fresh peer is built --
/// lets long-lived tasks detect a peer swap the way the teacher's video
/// loop does via `PEER_GENERATION`.
static PEER_GENERATION: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    frames_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    results_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    pub generation: u64,
}

impl WebRtcPeer {
    /// Build a peer connection and pre-create both data channels. Since the
    /// viewer always offers (unlike the teacher's agent, which only ever
    /// answers), the channels must exist before `create_offer` is called --
    /// a data channel created after the offer is sent never reaches the SDP.
    pub async fn new(ice_servers: Vec<IceServerConfig>) -> anyhow::Result<Self> {
        let media_engine = MediaEngine::default();
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut MediaEngine::default())
            .unwrap_or(registry);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_ice_servers: Vec<RTCIceServer> = if ice_servers.is_empty() {
            vec![RTCIceServer {
                urls: vec![
                    "stun:stun.l.google.com:19302".to_string(),
                    "stun:stun1.l.google.com:19302".to_string(),
                ],
                ..Default::default()
            }]
        } else {
            ice_servers
                .into_iter()
                .map(|s| RTCIceServer {
                    urls: s.urls,
                    username: s.username.unwrap_or_default(),
                    credential: s.credential.unwrap_or_default(),
                })
                .collect()
        };

        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let frames_dc = peer_connection
            .create_data_channel(
                "frames",
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .context("failed to create frames data channel")?;
        let results_dc = peer_connection
            .create_data_channel(
                "results",
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .context("failed to create results data channel")?;

        // Do NOT close the peer connection on failure -- a fresh offer from
        // a reconnecting capture peer can restart ICE and recover it.
        // Closing here would force a brand new room join instead.
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            match state {
                RTCPeerConnectionState::Failed => {
                    warn!("peer connection failed (will recover on next offer)");
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!("peer connection disconnected (ICE reconnecting)");
                }
                _ => {
                    info!(?state, "peer connection state changed");
                }
            }
            Box::pin(async {})
        }));

        let generation = PEER_GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation, "WebRTC peer connection created");

        Ok(Self {
            peer_connection,
            frames_channel: Arc::new(Mutex::new(Some(frames_dc))),
            results_channel: Arc::new(Mutex::new(Some(results_dc))),
            generation,
        })
    }

    /// Create the local offer and set it as the local description. The
    /// viewer sends the returned SDP to the broker for relay to the
    /// capture peer (spec §4.3 state Offering).
    pub async fn create_offer(&self) -> anyhow::Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .context("failed to create offer")?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .context("failed to set local description")?;
        Ok(offer.sdp)
    }

    /// Apply the capture peer's answer (spec §4.3 state Negotiating).
    pub async fn handle_answer(&self, sdp: &str) -> anyhow::Result<()> {
        let answer =
            RTCSessionDescription::answer(sdp.to_string()).context("failed to parse SDP answer")?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .context("failed to set remote description")?;
        Ok(())
    }

    pub async fn add_ice_candidate(
        &self,
        candidate: &str,
        sdp_mid: Option<&str>,
        sdp_mline_index: Option<u16>,
    ) -> anyhow::Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            sdp_mid: sdp_mid.map(|s| s.to_string()),
            sdp_mline_index,
            ..Default::default()
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .context("failed to add ICE candidate")?;
        Ok(())
    }

    pub fn on_ice_candidate(
        &self,
        callback: impl Fn(String, Option<String>, Option<u16>) + Send + Sync + 'static,
    ) {
        let callback = Arc::new(callback);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate| {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(json) => {
                            let cb = Arc::clone(&callback);
                            cb(json.candidate, json.sdp_mid, json.sdp_mline_index);
                        }
                        Err(e) => warn!("failed to serialize ICE candidate: {e}"),
                    }
                }
                Box::pin(async {})
            }));
    }

    /// Register the callback invoked for every inbound frames-channel
    /// message (spec §4.3 frame pipeline entry point).
    pub async fn on_frame(&self, callback: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        let dc = self.frames_channel.lock().await;
        if let Some(dc) = dc.as_ref() {
            let callback = Arc::new(callback);
            dc.on_message(Box::new(move |msg| {
                let cb = Arc::clone(&callback);
                cb(msg.data.to_vec());
                Box::pin(async {})
            }));
        }
    }

    /// Send a Detection Result back to the capture peer over the reverse
    /// channel. Per spec §4.3 "return path": if the channel is not open,
    /// the send is skipped, never retried.
    pub async fn send_result(&self, json: &str) {
        let dc = self.results_channel.lock().await;
        let Some(dc) = dc.as_ref() else { return };
        if dc.ready_state() != webrtc::data_channel::data_channel_state::RTCDataChannelState::Open {
            return;
        }
        if let Err(e) = dc.send_text(json.to_string()).await {
            warn!("data-channel send failed, not retried: {e}");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.peer_connection.connection_state() == RTCPeerConnectionState::Connected
    }

    pub async fn get_stats(&self) -> StatsReport {
        self.peer_connection.get_stats().await
    }

    /// Total transport bytes sent/received from the nominated ICE candidate
    /// pair, feeding the `BandwidthSampler` (spec §4.3 telemetry).
    pub async fn transport_bytes(&self) -> (u64, u64) {
        let stats = self.peer_connection.get_stats().await;
        for (_, stat) in stats.reports.iter() {
            if let webrtc::stats::StatsReportType::CandidatePair(pair) = stat {
                if pair.nominated {
                    return (pair.bytes_sent, pair.bytes_received);
                }
            }
        }
        (0, 0)
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.peer_connection
            .close()
            .await
            .context("failed to close peer connection")?;
        info!("peer connection closed");
        Ok(())
    }
}
