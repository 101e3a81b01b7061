//! Benchmark harness (spec §6.3–§6.4): drives one real viewer session for a
//! fixed duration against a live room, then persists the accumulated
//! latency/bandwidth/throughput statistics as a JSON record. Exercises the
//! same `glint_viewer` library the `glint-viewer` binary does -- this is
//! not a simulated pipeline.
//!
//! CLI parsing follows the same hand-rolled style as `viewer::cli`, absent
//! from the teacher (which has no bench harness) but matching its
//! no-`clap` convention.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use anyhow::Context;
use glint_detector::Detector;
use glint_protocol::DetectionResult;
use glint_viewer::orchestrator::{DetectionMode, Orchestrator, OrchestratorConfig, Telemetry, ViewerState};
use glint_viewer::peer::IceServerConfig;
use glint_viewer::telemetry::{BandwidthStats, LatencyRing, LatencyStats};
use glint_viewer::time::now_ms;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

const MIN_DURATION_SECS: u64 = 5;
/// Give up on an unreachable signaling server after this many failed
/// connect attempts, so a bad `--server-url` produces exit code 1 instead
/// of hanging for the full `--duration` (spec §6.4).
const CONNECT_ATTEMPT_LIMIT: u32 = 5;
/// Large enough that no real bench run evicts a sample before the final
/// report is computed -- unlike the viewer's live 100-sample ring, this
/// harness reports over the whole run.
const SAMPLE_CAPACITY: usize = 1_000_000;

enum Mode {
    Local,
    Offload,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Offload => "offload",
        }
    }
}

struct Args {
    duration_secs: u64,
    mode: Mode,
    output: PathBuf,
    server_url: String,
    room: String,
    model_path: Option<String>,
    input_size: u32,
    score_threshold: f32,
    nms_iou_threshold: f32,
    lazy_load: bool,
    ice_servers: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut duration_secs: Option<u64> = None;
    let mut mode: Option<Mode> = None;
    let mut output: Option<PathBuf> = None;
    let mut server_url = String::new();
    let mut room = String::new();
    let mut model_path: Option<String> = None;
    let mut input_size: u32 = 640;
    let mut score_threshold: f32 = 0.45;
    let mut nms_iou_threshold: f32 = 0.5;
    let mut lazy_load = false;
    let mut ice_servers: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                println!("bench - glint detection pipeline benchmark harness");
                println!();
                println!("USAGE:");
                println!("    bench --duration <SECONDS>=5 --mode <local|offload> --output <PATH> [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --duration <SECONDS>         Run length, minimum 5 (required)");
                println!("    --mode <local|offload>       Detection dispatch mode (required)");
                println!("    --output <PATH>              Output JSON path (required)");
                println!("    --server-url <URL>           Signaling broker WebSocket URL (required)");
                println!("    --room <ROOM>                Room to join (required)");
                println!("    --model-path <PATH>          ONNX model path (required for --mode local)");
                println!("    --input-size <PIXELS>        Model input size [default: 640]");
                println!("    --score-threshold <FLOAT>    Detection confidence threshold [default: 0.45]");
                println!("    --nms-iou-threshold <FLOAT>  NMS IoU threshold [default: 0.5]");
                println!("    --lazy-load                  Defer model load to first inference");
                println!("    --ice-servers <JSON>         ICE server config");
                std::process::exit(0);
            }
            "--duration" => {
                i += 1;
                duration_secs = Some(
                    args.get(i)
                        .context("Missing --duration value")?
                        .parse()
                        .context("Invalid --duration value")?,
                );
            }
            "--mode" => {
                i += 1;
                mode = Some(match args.get(i).context("Missing --mode value")?.as_str() {
                    "local" => Mode::Local,
                    "offload" => Mode::Offload,
                    other => anyhow::bail!("Invalid --mode value: {other} (expected local|offload)"),
                });
            }
            "--output" => {
                i += 1;
                output = Some(PathBuf::from(args.get(i).context("Missing --output value")?));
            }
            "--server-url" => {
                i += 1;
                server_url = args.get(i).context("Missing --server-url value")?.clone();
            }
            "--room" => {
                i += 1;
                room = args.get(i).context("Missing --room value")?.clone();
            }
            "--model-path" => {
                i += 1;
                model_path = Some(args.get(i).context("Missing --model-path value")?.clone());
            }
            "--input-size" => {
                i += 1;
                input_size = args
                    .get(i)
                    .context("Missing --input-size value")?
                    .parse()
                    .context("Invalid --input-size value")?;
            }
            "--score-threshold" => {
                i += 1;
                score_threshold = args
                    .get(i)
                    .context("Missing --score-threshold value")?
                    .parse()
                    .context("Invalid --score-threshold value")?;
            }
            "--nms-iou-threshold" => {
                i += 1;
                nms_iou_threshold = args
                    .get(i)
                    .context("Missing --nms-iou-threshold value")?
                    .parse()
                    .context("Invalid --nms-iou-threshold value")?;
            }
            "--lazy-load" => {
                lazy_load = true;
            }
            "--ice-servers" => {
                i += 1;
                ice_servers = Some(args.get(i).context("Missing --ice-servers value")?.clone());
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    let duration_secs = duration_secs.context("--duration is required")?;
    anyhow::ensure!(duration_secs >= MIN_DURATION_SECS, "--duration must be >= {MIN_DURATION_SECS}");
    let mode = mode.context("--mode is required")?;
    if matches!(mode, Mode::Local) && model_path.is_none() {
        anyhow::bail!("--model-path is required when --mode is local");
    }
    anyhow::ensure!(!server_url.is_empty(), "--server-url is required");
    anyhow::ensure!(!room.is_empty(), "--room is required");

    Ok(Args {
        duration_secs,
        mode,
        output: output.context("--output is required")?,
        server_url,
        room,
        model_path,
        input_size,
        score_threshold,
        nms_iou_threshold,
        lazy_load,
        ice_servers,
    })
}

fn parse_ice_servers(raw: &str) -> anyhow::Result<Vec<IceServerConfig>> {
    #[derive(serde::Deserialize)]
    struct RawIceServer {
        urls: Vec<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        credential: Option<String>,
    }
    let parsed: Vec<RawIceServer> =
        serde_json::from_str(raw).context("--ice-servers must be a JSON array")?;
    Ok(parsed
        .into_iter()
        .map(|s| IceServerConfig {
            urls: s.urls,
            username: s.username,
            credential: s.credential,
        })
        .collect())
}

#[derive(Default)]
struct BenchState {
    total_frames: u64,
    frames_with_detections: u64,
    e2e: LatencyRing,
    server: LatencyRing,
    network: LatencyRing,
    bandwidth: BandwidthStats,
}

struct BenchTelemetry {
    state: StdMutex<BenchState>,
}

impl BenchTelemetry {
    fn new() -> Self {
        Self {
            state: StdMutex::new(BenchState {
                e2e: LatencyRing::with_capacity(SAMPLE_CAPACITY),
                server: LatencyRing::with_capacity(SAMPLE_CAPACITY),
                network: LatencyRing::with_capacity(SAMPLE_CAPACITY),
                ..Default::default()
            }),
        }
    }
}

impl Telemetry for BenchTelemetry {
    fn on_result(&self, result: &DetectionResult, _e2e: LatencyStats, bandwidth: BandwidthStats) {
        let server_ms = result.inference_ts.saturating_sub(result.recv_ts) as f64;
        // The orchestrator only hands us the running median/p95, not the raw
        // per-frame sample, so the raw e2e value is recomputed here from the
        // result's own timestamps (spec §3 monotonic invariant).
        let raw_e2e_ms = result.inference_ts.max(result.recv_ts).saturating_sub(result.capture_ts) as f64;
        let network_ms = (raw_e2e_ms - server_ms).max(0.0);

        let mut state = self.state.lock().expect("bench telemetry mutex poisoned");
        state.total_frames += 1;
        if !result.detections.is_empty() {
            state.frames_with_detections += 1;
        }
        state.e2e.push(raw_e2e_ms);
        state.server.push(server_ms);
        state.network.push(network_ms);
        state.bandwidth = bandwidth;
    }

    fn on_state_change(&self, state: ViewerState) {
        info!(?state, "bench viewer state");
    }
}

#[derive(Serialize)]
struct LatencyReport {
    median_ms: f64,
    p95_ms: f64,
    average_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl From<LatencyStats> for LatencyReport {
    fn from(s: LatencyStats) -> Self {
        Self {
            median_ms: s.median_ms,
            p95_ms: s.p95_ms,
            average_ms: s.average_ms,
            min_ms: s.min_ms,
            max_ms: s.max_ms,
        }
    }
}

#[derive(Serialize)]
struct BenchmarkSection {
    timestamp: u64,
    mode: String,
    duration_seconds: u64,
    total_frames: u64,
    frames_with_detections: u64,
    detection_rate_percent: f64,
}

#[derive(Serialize)]
struct PerformanceSection {
    processed_fps: f64,
    e2e_latency: LatencyReport,
    server_latency: LatencyReport,
    network_latency: LatencyReport,
}

#[derive(Serialize)]
struct BandwidthSection {
    uplink_kbps: f64,
    downlink_kbps: f64,
    total_bytes_sent: u64,
    total_bytes_received: u64,
}

#[derive(Serialize)]
struct BenchmarkRecord {
    benchmark: BenchmarkSection,
    performance: PerformanceSection,
    bandwidth: BandwidthSection,
}

fn build_record(args: &Args, elapsed_secs: f64, timestamp: u64, state: &BenchState) -> BenchmarkRecord {
    let detection_rate_percent = if state.total_frames > 0 {
        state.frames_with_detections as f64 / state.total_frames as f64 * 100.0
    } else {
        0.0
    };
    let processed_fps = if elapsed_secs > 0.0 {
        state.total_frames as f64 / elapsed_secs
    } else {
        0.0
    };

    BenchmarkRecord {
        benchmark: BenchmarkSection {
            timestamp,
            mode: args.mode.as_str().to_string(),
            duration_seconds: args.duration_secs,
            total_frames: state.total_frames,
            frames_with_detections: state.frames_with_detections,
            detection_rate_percent,
        },
        performance: PerformanceSection {
            processed_fps,
            e2e_latency: state.e2e.stats().into(),
            server_latency: state.server.stats().into(),
            network_latency: state.network.stats().into(),
        },
        bandwidth: BandwidthSection {
            uplink_kbps: state.bandwidth.uplink_kbps,
            downlink_kbps: state.bandwidth.downlink_kbps,
            total_bytes_sent: state.bandwidth.total_bytes_sent,
            total_bytes_received: state.bandwidth.total_bytes_received,
        },
    }
}

/// Insert a `_partial` suffix before the file extension (`out.json` ->
/// `out_partial.json`), per spec §6.4.
fn partial_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let ext = path.extension().and_then(|s| s.to_str());
    let file_name = match ext {
        Some(ext) => format!("{stem}_partial.{ext}"),
        None => format!("{stem}_partial"),
    };
    path.with_file_name(file_name)
}

fn write_record(path: &Path, record: &BenchmarkRecord) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(record).context("failed to serialize benchmark record")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("bench: {e:#}");
            std::process::exit(1);
        }
    };

    let ice_servers = match &args.ice_servers {
        Some(raw) => parse_ice_servers(raw).unwrap_or_else(|e| {
            eprintln!("bench: {e:#}");
            std::process::exit(1);
        }),
        None => Vec::new(),
    };

    let mode = match args.mode {
        Mode::Local => {
            let model_path = args.model_path.clone().expect("checked in parse_args");
            let detector = Detector::new(model_path, args.input_size, args.lazy_load);
            DetectionMode::Local {
                detector,
                score_threshold: args.score_threshold,
                nms_iou_threshold: args.nms_iou_threshold,
            }
        }
        Mode::Offload => DetectionMode::Offload,
    };

    let config = OrchestratorConfig {
        server_url: args.server_url.clone(),
        room: args.room.clone(),
        mode,
        ice_servers,
        connect_attempt_limit: Some(CONNECT_ATTEMPT_LIMIT),
    };

    let telemetry = Arc::new(BenchTelemetry::new());
    let orchestrator = Orchestrator::new(config);
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let (connect_failure_tx, mut connect_failure_rx) = tokio::sync::oneshot::channel::<anyhow::Error>();
    let run_handle = tokio::spawn(orchestrator.run(
        telemetry.clone() as Arc<dyn Telemetry>,
        shutdown_rx,
        Some(connect_failure_tx),
    ));

    let started = std::time::Instant::now();
    let run_duration = std::time::Duration::from_secs(args.duration_secs);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let exit_code;
    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::time::sleep(run_duration) => {
                info!("benchmark duration elapsed");
                exit_code = 0;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("benchmark interrupted (SIGINT)");
                exit_code = 130;
            }
            _ = sigterm.recv() => {
                info!("benchmark terminated (SIGTERM)");
                exit_code = 143;
            }
            Ok(e) = &mut connect_failure_rx => {
                eprintln!("bench: {e:#}");
                exit_code = 1;
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::time::sleep(run_duration) => {
                exit_code = 0;
            }
            _ = tokio::signal::ctrl_c() => {
                exit_code = 130;
            }
            Ok(e) = &mut connect_failure_rx => {
                eprintln!("bench: {e:#}");
                exit_code = 1;
            }
        }
    }

    let elapsed_secs = started.elapsed().as_secs_f64();
    let _ = shutdown_tx.send(()).await;
    let _ = run_handle.await;

    let timestamp = now_ms();
    let state = telemetry.state.lock().expect("bench telemetry mutex poisoned");
    let record = build_record(&args, elapsed_secs, timestamp, &state);

    let output_path = if exit_code == 0 { args.output.clone() } else { partial_path(&args.output) };

    if exit_code == 0 || state.total_frames > 0 {
        if let Err(e) = write_record(&output_path, &record) {
            eprintln!("bench: {e:#}");
            std::process::exit(1);
        }
        info!(path = %output_path.display(), "benchmark record written");
    }

    std::process::exit(exit_code);
}
