//! Hand-rolled flag parsing, grounded in the teacher's `agent::cli`: a flat
//! `while` loop over `std::env::args()` with `anyhow::Context` on every
//! missing/invalid value, no external argument-parsing crate.

use anyhow::Context;

pub(crate) const DEFAULT_SCORE_THRESHOLD: f32 = 0.45;
pub(crate) const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.5;
pub(crate) const DEFAULT_INPUT_SIZE: u32 = 640;

pub(crate) enum Mode {
    Local,
    Offload,
}

pub(crate) struct Args {
    pub server_url: String,
    pub room: String,
    pub mode: Mode,
    pub model_path: Option<String>,
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_iou_threshold: f32,
    pub lazy_load: bool,
    pub ice_servers: Option<String>,
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut server_url = String::new();
    let mut room = String::new();
    let mut mode = Mode::Local;
    let mut model_path: Option<String> = None;
    let mut input_size: u32 = DEFAULT_INPUT_SIZE;
    let mut score_threshold: f32 = DEFAULT_SCORE_THRESHOLD;
    let mut nms_iou_threshold: f32 = DEFAULT_NMS_IOU_THRESHOLD;
    let mut lazy_load = false;
    let mut ice_servers: Option<String> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("glint-viewer {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("glint-viewer - real-time multi-object detection viewer");
                println!();
                println!("USAGE:");
                println!("    glint-viewer [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --server-url <URL>           Signaling broker WebSocket URL (required)");
                println!("    --room <ROOM>                Room to join (required)");
                println!("    --mode <local|offload>       Detection dispatch mode [default: local]");
                println!("    --model-path <PATH>          ONNX model path (required for --mode local)");
                println!("    --input-size <PIXELS>        Model input size [default: 640]");
                println!("    --score-threshold <FLOAT>    Detection confidence threshold [default: 0.45]");
                println!("    --nms-iou-threshold <FLOAT>  NMS IoU threshold [default: 0.5]");
                println!("    --lazy-load                  Defer model load to first inference");
                println!("    --ice-servers <JSON>         ICE server config, e.g. a STUN/TURN array");
                println!("    -V, --version                Print version and exit");
                println!("    -h, --help                   Print this help and exit");
                std::process::exit(0);
            }
            "--server-url" => {
                i += 1;
                server_url = args.get(i).context("Missing --server-url value")?.clone();
            }
            "--room" => {
                i += 1;
                room = args.get(i).context("Missing --room value")?.clone();
            }
            "--mode" => {
                i += 1;
                mode = match args.get(i).context("Missing --mode value")?.as_str() {
                    "local" => Mode::Local,
                    "offload" => Mode::Offload,
                    other => anyhow::bail!("Invalid --mode value: {other} (expected local|offload)"),
                };
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

    if matches!(mode, Mode::Local) && model_path.is_none() {
        anyhow::bail!("--model-path is required when --mode is local");
    }

    anyhow::ensure!(!server_url.is_empty(), "--server-url is required");
    anyhow::ensure!(!room.is_empty(), "--room is required");

    Ok(Args {
        server_url,
        room,
        mode,
        model_path,
        input_size,
        score_threshold,
        nms_iou_threshold,
        lazy_load,
        ice_servers,
    })
}

/// Parse the `--ice-servers` JSON array into peer configs. Absent or empty,
/// the peer falls back to its built-in public STUN servers.
pub(crate) fn parse_ice_servers(raw: &str) -> anyhow::Result<Vec<glint_viewer::peer::IceServerConfig>> {
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
        .map(|s| glint_viewer::peer::IceServerConfig {
            urls: s.urls,
            username: s.username,
            credential: s.credential,
        })
        .collect())
}
