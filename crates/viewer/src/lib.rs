//! Shared viewer orchestration, split out as a library so both the
//! `glint-viewer` binary and the `bench` harness drive the same session
//! code (spec §6.4: "the benchmark harness runs the real pipeline, not a
//! simulation").

pub mod offload;
pub mod orchestrator;
pub mod peer;
pub mod pipeline;
pub mod signaling;
pub mod telemetry;
pub mod time;
