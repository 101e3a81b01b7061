//! Control-connection WebSocket client: the viewer's half of spec §6.1's
//! signaling wire protocol. Grounded in the teacher's
//! `agent::signaling::run_signaling`/`connect_and_handle` (reconnect with
//! exponential backoff, a `select!` over inbound/outbound) minus TLS
//! pinning and the token query param -- this system's control connection
//! is unauthenticated and plaintext (spec Non-goals retain no auth/TLS
//! beyond the tunnel).

use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use glint_protocol::SignalingMessage;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Run the signaling WebSocket connection with reconnect. `outbound_rx`
/// carries messages the orchestrator wants sent; every inbound message is
/// forwarded to `event_tx`. Returns `Ok(())` when `outbound_rx` closes
/// (shutdown). `max_attempts`, if set, bounds the number of failed connect
/// attempts before giving up and returning `Err` -- `None` retries forever,
/// which is what the long-running viewer wants (spec §6.4 leaves exit-code
/// precondition handling to callers that actually need a deadline, like the
/// bench harness).
pub async fn run_signaling(
    server_url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<SignalingMessage>,
    event_tx: mpsc::UnboundedSender<SignalingMessage>,
    max_attempts: Option<u32>,
) -> anyhow::Result<()> {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(30);
    let mut attempts: u32 = 0;

    loop {
        info!(url = %server_url, "connecting to signaling broker");
        match connect_and_handle(&server_url, &mut outbound_rx, &event_tx).await {
            Ok(()) => {
                info!("signaling connection closed cleanly");
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if let Some(limit) = max_attempts {
                    if attempts >= limit {
                        return Err(e.context(format!("signaling server unreachable after {attempts} attempts")));
                    }
                }
                warn!("signaling connection error: {e:#}");
                info!("reconnecting in {}s", backoff.as_secs());
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

async fn connect_and_handle(
    server_url: &str,
    outbound_rx: &mut mpsc::UnboundedReceiver<SignalingMessage>,
    event_tx: &mpsc::UnboundedSender<SignalingMessage>,
) -> anyhow::Result<()> {
    let url = format!("{server_url}/ws");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
    info!("connected to signaling broker");
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SignalingMessage>(&text) {
                            Ok(parsed) => {
                                if event_tx.send(parsed).is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!("invalid message from broker: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        let json = serde_json::to_string(&msg)?;
                        ws_tx.send(Message::Text(json.into())).await?;
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}
