//! Millisecond epoch timestamps, used for frame throttling and the
//! capture/recv/inference timestamps in `DetectionResult` (spec §3).

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
