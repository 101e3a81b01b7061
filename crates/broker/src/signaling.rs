//! WebSocket control-connection handling (spec §4.1): a single upgrade
//! endpoint carries `join-room`, `offer`/`answer`/`ice-candidate` relay,
//! and `process-frame`/`initialize-server-model` requests for whichever
//! role the first message declares.
//!
//! Grounded in the teacher's `handle_browser_ws`/`handle_agent_ws`
//! (`crates/server/src/signaling.rs`): same ping/pong keepalive constants,
//! same `tokio::select!` shape, same broadcast-channel relay — generalized
//! from an implicit one-agent-one-browser session to the explicit
//! `Room`/`RoleSlot` pair in [`crate::rooms`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use glint_protocol::{Role, SignalingMessage};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use glint_detector::Detector;

use crate::engine::Engine;
use crate::rooms::{self, Room, RoomRegistry};

const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
const WS_PONG_TIMEOUT: Duration = Duration::from_secs(90);

/// Handle one control-connection WebSocket end to end: wait for
/// `join-room`, register the peer in its room, then relay until the
/// socket closes, the peer is evicted, or the ping/pong keepalive times
/// out.
pub async fn handle_ws(
    mut socket: WebSocket,
    registry: RoomRegistry,
    engine: Arc<Engine>,
    detector: Arc<Detector>,
) {
    let peer_id = Uuid::new_v4().to_string();

    let (room_id, role) = match wait_for_join(&mut socket).await {
        Some(v) => v,
        None => {
            tracing::debug!(%peer_id, "connection closed before join-room");
            return;
        }
    };

    let room = rooms::get_or_create_room(&registry, &room_id).await;
    let slot = room.slot(role);

    // Eviction policy: a second join of an occupied role evicts the
    // incumbent (Design Note §9).
    if *slot.occupied.read().await {
        tracing::info!(room = %room_id, ?role, "evicting existing peer for role");
        slot.kick.notify_waiters();
    }
    *slot.occupied.write().await = true;

    // Register this connection's own kick listener AFTER evicting any
    // incumbent, mirroring the teacher's `browser_kick` ordering.
    let kicked = slot.kick.notified();
    tokio::pin!(kicked);

    let other = room.slot(role.other());
    if *other.occupied.read().await {
        let joined = SignalingMessage::PeerJoined {
            peer_id: peer_id.clone(),
            role,
        };
        if let Ok(json) = serde_json::to_string(&joined) {
            let _ = socket.send(Message::Text(json.into())).await;
        }
        let _ = other.to_peer.send(SignalingMessage::PeerJoined { peer_id: peer_id.clone(), role });
    }

    let mut from_peer = slot.to_peer.subscribe();

    let mut ping_interval = interval(WS_PING_INTERVAL);
    ping_interval.tick().await;
    let mut last_pong = Instant::now();

    tracing::info!(room = %room_id, ?role, %peer_id, "peer connected");

    loop {
        tokio::select! {
            _ = &mut kicked => {
                tracing::info!(room = %room_id, ?role, %peer_id, "peer replaced by new connection");
                let msg = SignalingMessage::ProcessingError { error: "replaced".to_string() };
                if let Ok(json) = serde_json::to_string(&msg) {
                    let _ = socket.send(Message::Text(json.into())).await;
                }
                break;
            }
            _ = ping_interval.tick() => {
                if last_pong.elapsed() > WS_PONG_TIMEOUT {
                    tracing::debug!(room = %room_id, ?role, "ping timeout, closing");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            result = from_peer.recv() => {
                let msg = match result {
                    Ok(m) => m,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(room = %room_id, ?role, skipped = n, "relay consumer lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("failed to serialize relayed message: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Some(result) = socket.recv() => {
                match result {
                    Ok(Message::Text(text)) => {
                        handle_inbound(&text, &room, role, &peer_id, &engine, &detector, &mut socket).await;
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!(room = %room_id, ?role, "connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(room = %room_id, ?role, "websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            else => break,
        }
    }

    *slot.occupied.write().await = false;
    let _ = other.to_peer.send(SignalingMessage::PeerLeft { peer_id: peer_id.clone(), role });
    rooms::remove_room_if_empty(&registry, &room_id).await;
    tracing::info!(room = %room_id, ?role, %peer_id, "peer disconnected");
}

/// Wait for the mandatory first `join-room` message. Any other message
/// received first is rejected and the connection closed (spec §6.1).
async fn wait_for_join(socket: &mut WebSocket) -> Option<(String, Role)> {
    while let Some(result) = socket.recv().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                Ok(SignalingMessage::JoinRoom { room, role }) => return Some((room, role)),
                Ok(_) => {
                    tracing::warn!("first message was not join-room");
                    return None;
                }
                Err(e) => {
                    tracing::warn!("invalid join-room payload: {e}");
                    return None;
                }
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

async fn handle_inbound(
    text: &str,
    room: &Arc<Room>,
    role: Role,
    peer_id: &str,
    engine: &Arc<Engine>,
    detector: &Arc<Detector>,
    socket: &mut WebSocket,
) {
    let msg = match serde_json::from_str::<SignalingMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(%peer_id, "invalid message: {e}");
            let err = SignalingMessage::ProcessingError {
                error: format!("invalid message format: {e}"),
            };
            if let Ok(json) = serde_json::to_string(&err) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            return;
        }
    };

    match msg {
        SignalingMessage::Offer { room: r, offer, .. } => {
            let relayed = SignalingMessage::Offer { room: r, offer, from: Some(peer_id.to_string()) };
            let _ = room.slot(role.other()).to_peer.send(relayed);
        }
        SignalingMessage::Answer { room: r, answer, .. } => {
            let relayed = SignalingMessage::Answer { room: r, answer, from: Some(peer_id.to_string()) };
            let _ = room.slot(role.other()).to_peer.send(relayed);
        }
        SignalingMessage::IceCandidate { room: r, candidate, .. } => {
            let relayed = SignalingMessage::IceCandidate { room: r, candidate, from: Some(peer_id.to_string()) };
            let _ = room.slot(role.other()).to_peer.send(relayed);
        }
        SignalingMessage::ProcessFrame { room: r, frame_id, capture_ts, width, height, image_data } => {
            let frame = glint_protocol::FrameRequest {
                room: r,
                frame_id,
                capture_ts,
                width,
                height,
                image_data,
            };
            let reply = room.slot(role).to_peer.clone();
            if !engine.submit(&frame.room, frame, reply) {
                tracing::debug!(%peer_id, "frame throttled or dropped");
            }
        }
        SignalingMessage::InitializeServerModel { room: r } => {
            let detector = Arc::clone(detector);
            let reply = room.slot(role).to_peer.clone();
            tokio::spawn(async move {
                let result = detector.initialize().await;
                let msg = match result {
                    Ok(load_time_ms) => SignalingMessage::ModelInitializationResult {
                        success: true,
                        message: Some("model ready".to_string()),
                        error: None,
                        load_time_ms: Some(load_time_ms),
                        room: r,
                    },
                    Err(e) => SignalingMessage::ModelInitializationResult {
                        success: false,
                        message: None,
                        error: Some(e.to_string()),
                        load_time_ms: None,
                        room: r,
                    },
                };
                let _ = reply.send(msg);
            });
        }
        SignalingMessage::JoinRoom { .. } => {
            tracing::warn!(%peer_id, "unexpected duplicate join-room, ignoring");
        }
        other => {
            tracing::debug!(%peer_id, ?other, "ignoring message not expected from a client");
        }
    }
}
