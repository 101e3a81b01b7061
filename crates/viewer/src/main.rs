mod cli;

use std::sync::Arc;

use glint_detector::Detector;
use glint_protocol::DetectionResult;
use glint_viewer::orchestrator::{DetectionMode, Orchestrator, OrchestratorConfig, Telemetry, ViewerState};
use glint_viewer::telemetry::{BandwidthStats, LatencyStats};
use tokio::sync::mpsc;
use tracing::info;

/// Logs every Detection Result and state transition to stdout via
/// `tracing`. The standalone binary has no UI collaborator, so this is the
/// concrete `Telemetry` implementation plugged into the orchestrator.
struct LoggingTelemetry;

impl Telemetry for LoggingTelemetry {
    fn on_result(&self, result: &DetectionResult, latency: LatencyStats, bandwidth: BandwidthStats) {
        info!(
            frame_id = %result.frame_id,
            detections = result.detections.len(),
            e2e_p95_ms = latency.p95_ms,
            uplink_kbps = bandwidth.uplink_kbps,
            downlink_kbps = bandwidth.downlink_kbps,
            "detection result"
        );
    }

    fn on_state_change(&self, state: ViewerState) {
        info!(?state, "viewer state");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;
    info!(server_url = %args.server_url, room = %args.room, "starting glint-viewer");

    let ice_servers = match &args.ice_servers {
        Some(raw) => cli::parse_ice_servers(raw)?,
        None => Vec::new(),
    };

    let mode = match args.mode {
        cli::Mode::Local => {
            let model_path = args
                .model_path
                .clone()
                .expect("--model-path required for local mode, checked in parse_args");
            let detector = Detector::new(model_path, args.input_size, args.lazy_load);
            DetectionMode::Local {
                detector,
                score_threshold: args.score_threshold,
                nms_iou_threshold: args.nms_iou_threshold,
            }
        }
        cli::Mode::Offload => DetectionMode::Offload,
    };

    let config = OrchestratorConfig {
        server_url: args.server_url,
        room: args.room,
        mode,
        ice_servers,
        connect_attempt_limit: None,
    };

    let orchestrator = Orchestrator::new(config);
    let telemetry: Arc<dyn Telemetry> = Arc::new(LoggingTelemetry);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let run_handle = tokio::spawn(orchestrator.run(telemetry, shutdown_rx, None));

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received ctrl-c, shutting down");
    }

    let _ = shutdown_tx.send(()).await;
    let _ = run_handle.await;
    info!("glint-viewer shutdown complete");
    Ok(())
}
