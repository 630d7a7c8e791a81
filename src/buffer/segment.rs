use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Where a segment's duration estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationSource {
    /// Measured from the gap between successive chunk-ready events
    Elapsed,
    /// Inferred from payload size and the configured capture bitrate
    Bitrate,
}

/// One immutable chunk of captured media
///
/// The payload is reference counted, so snapshots can hold on to segments
/// after the store has evicted them without copying any media bytes.
#[derive(Debug, Clone)]
pub struct Segment {
    sequence: u64,
    timestamp_ms: u64,
    payload: Arc<[u8]>,
    estimated_duration: Duration,
    duration_source: DurationSource,
}

impl Segment {
    /// Create a segment that has not been appended to a store yet.
    ///
    /// The sequence number is assigned by `SegmentStore::append`.
    pub fn new(
        payload: impl Into<Arc<[u8]>>,
        timestamp_ms: u64,
        estimated_duration: Duration,
        duration_source: DurationSource,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp_ms,
            payload: payload.into(),
            estimated_duration,
            duration_source,
        }
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Monotonic position in capture order, assigned at append time
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Capture source timestamp of the chunk-ready event
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    pub fn estimated_duration(&self) -> Duration {
        self.estimated_duration
    }

    pub fn duration_source(&self) -> DurationSource {
        self.duration_source
    }
}
