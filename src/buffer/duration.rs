// Duration estimation for captured chunks
//
// Capture pipelines emit irregular chunks that do not report their own
// playback length. Two strategies are supported:
// - Elapsed: the gap between successive chunk-ready timestamps
// - Bitrate: payload size divided by the configured capture bitrate
//
// The bitrate estimate is an approximation. It drifts whenever the real
// encoder bitrate moves away from the configured constant (scene complexity
// changes the compression ratio), so Elapsed is the default and Bitrate is
// only used when no timing is available.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::segment::DurationSource;

/// Duration estimation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationMode {
    /// Measure time between chunk-ready events, falling back to bitrate
    #[default]
    Elapsed,
    /// Always infer duration from payload size
    Bitrate,
}

/// Per-session duration estimator
#[derive(Debug, Clone)]
pub struct DurationEstimator {
    mode: DurationMode,
    bytes_per_second: u64,
    previous_ms: Option<u64>,
}

impl DurationEstimator {
    pub fn new(mode: DurationMode, bytes_per_second: u64) -> Self {
        Self {
            mode,
            // A zero bitrate would divide by zero; config validation rejects it upstream
            bytes_per_second: bytes_per_second.max(1),
            previous_ms: None,
        }
    }

    pub fn mode(&self) -> DurationMode {
        self.mode
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Estimate from size alone
    pub fn bitrate_estimate(&self, size_bytes: usize) -> Duration {
        let nanos = size_bytes as u128 * 1_000_000_000 / self.bytes_per_second as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Estimate the duration of a chunk that became ready at `timestamp_ms`.
    ///
    /// Advances the estimator, so call it once per accepted chunk.
    pub fn estimate(&mut self, size_bytes: usize, timestamp_ms: u64) -> (Duration, DurationSource) {
        let estimate = match (self.mode, self.previous_ms) {
            (DurationMode::Elapsed, Some(previous)) if timestamp_ms > previous => (
                Duration::from_millis(timestamp_ms - previous),
                DurationSource::Elapsed,
            ),
            _ => (self.bitrate_estimate(size_bytes), DurationSource::Bitrate),
        };

        self.previous_ms = Some(timestamp_ms);
        estimate
    }

    /// Forget timing from the previous session
    pub fn reset(&mut self) {
        self.previous_ms = None;
    }
}
