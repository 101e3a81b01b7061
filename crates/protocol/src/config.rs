//! TOML-backed configuration (spec §1 ambient stack): missing file falls
//! back to defaults, present file is parsed and merged per-section via
//! `serde(default)`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlintConfig {
    pub server: ServerConfig,
    pub detector: DetectorConfig,
    pub room: RoomConfig,
    pub viewer: ViewerConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for GlintConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            detector: DetectorConfig::default(),
            room: RoomConfig::default(),
            viewer: ViewerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Broker bind address. No web root, no TLS, no JWT secret — this system
/// has no UI to serve and no login concept (rooms are anonymous).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Detector/Inference Engine settings (spec §4.2, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: String,
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_iou_threshold: f32,
    /// If false, the model loads at process startup; if true, loading is
    /// deferred to the first `initialize-model` request (spec §4.2).
    pub lazy_load: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_size: default_input_size(),
            score_threshold: default_score_threshold(),
            nms_iou_threshold: default_nms_iou_threshold(),
            lazy_load: default_lazy_load(),
        }
    }
}

/// Per-room throttling (spec §4.2 step "minimum inter-frame interval").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub min_interframe_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_interframe_ms: default_min_interframe_ms(),
        }
    }
}

/// Viewer Orchestrator settings (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub offload_timeout_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            offload_timeout_ms: default_offload_timeout_ms(),
        }
    }
}

/// Telemetry ring sizes (spec §3/§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub latency_ring_size: usize,
    pub bandwidth_ring_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            latency_ring_size: default_latency_ring_size(),
            bandwidth_ring_size: default_bandwidth_ring_size(),
        }
    }
}

impl GlintConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal) or "WARNING:" (advisory).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("ERROR: server.port must be between 1 and 65535, got 0.".to_string());
        }

        if self.detector.model_path.trim().is_empty() {
            issues.push("ERROR: detector.model_path must not be empty.".to_string());
        }

        if self.detector.input_size == 0 {
            issues.push("ERROR: detector.input_size must be >= 1.".to_string());
        }

        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            issues.push(format!(
                "ERROR: detector.score_threshold must be in [0.0, 1.0], got {}.",
                self.detector.score_threshold
            ));
        }

        if !(0.0..=1.0).contains(&self.detector.nms_iou_threshold) {
            issues.push(format!(
                "ERROR: detector.nms_iou_threshold must be in [0.0, 1.0], got {}.",
                self.detector.nms_iou_threshold
            ));
        }

        if self.room.min_interframe_ms == 0 {
            issues.push(
                "WARNING: room.min_interframe_ms is 0 — no per-room throttling will occur."
                    .to_string(),
            );
        }

        if self.viewer.offload_timeout_ms == 0 {
            issues.push("ERROR: viewer.offload_timeout_ms must be >= 1.".to_string());
        }

        if self.telemetry.latency_ring_size == 0 {
            issues.push("ERROR: telemetry.latency_ring_size must be >= 1.".to_string());
        }
        if self.telemetry.bandwidth_ring_size == 0 {
            issues.push("ERROR: telemetry.bandwidth_ring_size must be >= 1.".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8444
}
fn default_model_path() -> String {
    "models/detector.onnx".to_string()
}
fn default_input_size() -> u32 {
    640
}
fn default_score_threshold() -> f32 {
    0.45
}
fn default_nms_iou_threshold() -> f32 {
    0.5
}
fn default_lazy_load() -> bool {
    true
}
fn default_min_interframe_ms() -> u64 {
    100
}
fn default_offload_timeout_ms() -> u64 {
    200
}
fn default_latency_ring_size() -> usize {
    100
}
fn default_bandwidth_ring_size() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(GlintConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut cfg = GlintConfig::default();
        cfg.server.port = 0;
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("server.port")));
    }

    #[test]
    fn score_threshold_out_of_range_is_rejected() {
        let mut cfg = GlintConfig::default();
        cfg.detector.score_threshold = 1.5;
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("score_threshold")));
    }

    #[test]
    fn empty_model_path_is_rejected() {
        let mut cfg = GlintConfig::default();
        cfg.detector.model_path = String::new();
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("model_path")));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let toml_str = "";
        let cfg: GlintConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.port, default_port());
        assert_eq!(cfg.detector.input_size, 640);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let toml_str = r#"
            [detector]
            score_threshold = 0.6
        "#;
        let cfg: GlintConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.detector.score_threshold, 0.6);
        assert_eq!(cfg.detector.input_size, 640);
        assert_eq!(cfg.room.min_interframe_ms, 100);
    }
}
