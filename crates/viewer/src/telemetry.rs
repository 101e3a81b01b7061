//! Viewer telemetry (spec §4.3): a 100-sample end-to-end latency ring with
//! median/P95, and a 10-entry bandwidth snapshot ring derived from periodic
//! `RTCPeerConnection::get_stats()` polls. New code relative to the
//! teacher -- it has no percentile telemetry -- but deliberately simple,
//! matching the teacher's preference for hand-rolled bounded collections
//! (e.g. `LoginRateLimiter`'s per-key `Vec<Instant>`) over a metrics crate.

use std::collections::VecDeque;

const LATENCY_RING_CAPACITY: usize = 100;
const BANDWIDTH_RING_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub median_ms: f64,
    pub p95_ms: f64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Bounded ring of end-to-end latency samples (milliseconds).
pub struct LatencyRing {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyRing {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, latency_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Recompute median/P95/average/min/max over a sorted copy. P95 uses
    /// index `floor(0.95 * size)` into the sorted copy, per spec §4.3.
    pub fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let p95_idx = ((n as f64) * 0.95).floor() as usize;
        let p95 = sorted[p95_idx.min(n - 1)];
        let sum: f64 = sorted.iter().sum();

        LatencyStats {
            median_ms: median,
            p95_ms: p95,
            average_ms: sum / n as f64,
            min_ms: sorted[0],
            max_ms: sorted[n - 1],
        }
    }
}

impl Default for LatencyRing {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct BandwidthSnapshot {
    timestamp_ms: u64,
    bytes_sent: u64,
    bytes_received: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandwidthStats {
    pub uplink_kbps: f64,
    pub downlink_kbps: f64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

/// Bounded ring of (timestamp, bytes_sent, bytes_received) snapshots, used
/// to derive uplink/downlink kbps from the oldest-to-newest delta over
/// elapsed wall time (spec §4.3).
pub struct BandwidthSampler {
    snapshots: VecDeque<BandwidthSnapshot>,
    capacity: usize,
}

impl BandwidthSampler {
    pub fn new() -> Self {
        Self::with_capacity(BANDWIDTH_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, timestamp_ms: u64, bytes_sent: u64, bytes_received: u64) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(BandwidthSnapshot {
            timestamp_ms,
            bytes_sent,
            bytes_received,
        });
    }

    pub fn stats(&self) -> BandwidthStats {
        let (Some(oldest), Some(newest)) = (self.snapshots.front(), self.snapshots.back()) else {
            return BandwidthStats::default();
        };
        if oldest.timestamp_ms == newest.timestamp_ms {
            return BandwidthStats {
                total_bytes_sent: newest.bytes_sent,
                total_bytes_received: newest.bytes_received,
                ..Default::default()
            };
        }

        let elapsed_secs = (newest.timestamp_ms - oldest.timestamp_ms) as f64 / 1000.0;
        let sent_delta = newest.bytes_sent.saturating_sub(oldest.bytes_sent);
        let recv_delta = newest.bytes_received.saturating_sub(oldest.bytes_received);

        BandwidthStats {
            uplink_kbps: (sent_delta as f64 * 8.0 / 1000.0) / elapsed_secs,
            downlink_kbps: (recv_delta as f64 * 8.0 / 1000.0) / elapsed_secs,
            total_bytes_sent: newest.bytes_sent,
            total_bytes_received: newest.bytes_received,
        }
    }
}

impl Default for BandwidthSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_ring_evicts_oldest_beyond_capacity() {
        let mut ring = LatencyRing::with_capacity(3);
        ring.push(1.0);
        ring.push(2.0);
        ring.push(3.0);
        ring.push(4.0);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn latency_ring_median_and_p95_on_known_set() {
        let mut ring = LatencyRing::with_capacity(100);
        for i in 1..=20 {
            ring.push(i as f64);
        }
        let stats = ring.stats();
        assert_eq!(stats.median_ms, 10.5);
        // floor(0.95 * 20) = 19 -> sorted[19] = 20.0
        assert_eq!(stats.p95_ms, 20.0);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 20.0);
    }

    #[test]
    fn latency_ring_empty_stats_are_zeroed() {
        let ring = LatencyRing::new();
        assert_eq!(ring.stats(), LatencyStats::default());
    }

    #[test]
    fn bandwidth_sampler_computes_kbps_from_oldest_to_newest() {
        let mut sampler = BandwidthSampler::with_capacity(10);
        sampler.record(0, 0, 0);
        sampler.record(1000, 125_000, 62_500);
        let stats = sampler.stats();
        assert_eq!(stats.uplink_kbps, 1000.0);
        assert_eq!(stats.downlink_kbps, 500.0);
    }

    #[test]
    fn bandwidth_sampler_evicts_oldest_beyond_capacity() {
        let mut sampler = BandwidthSampler::with_capacity(2);
        sampler.record(0, 0, 0);
        sampler.record(1000, 100, 100);
        sampler.record(2000, 200, 200);
        // Oldest (t=0) should have been evicted; window is now t=1000..2000.
        let stats = sampler.stats();
        assert_eq!(stats.uplink_kbps, 800.0);
    }
}
