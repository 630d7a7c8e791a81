use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::policy::{CapacityPolicy, CapacityRange, NewestSuffix};
use super::segment::Segment;
use crate::error::ReplayResult;

/// Store handle shared between the capture pump, exporter and HTTP handlers
///
/// Mutations take the write lock and snapshots the read lock, so a snapshot
/// never observes a half-applied append or trim.
pub type SharedStore = Arc<RwLock<SegmentStore>>;

/// Result of a single append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Sequence number assigned to the new segment
    pub sequence: u64,
    /// Number of oldest segments evicted by the trim that followed
    pub evicted: usize,
}

/// Rolling buffer of captured segments, bounded by total duration
#[derive(Debug)]
pub struct SegmentStore {
    segments: VecDeque<Segment>,
    capacity_secs: u64,
    range: CapacityRange,
    policy: Box<dyn CapacityPolicy>,
    next_sequence: u64,
    retained_duration: Duration,
    retained_bytes: usize,
    total_appended: u64,
    total_evicted: u64,
}

impl SegmentStore {
    /// Create a store using the newest-suffix policy
    pub fn new(capacity_secs: u64, range: CapacityRange) -> ReplayResult<Self> {
        Self::with_policy(capacity_secs, range, Box::new(NewestSuffix))
    }

    pub fn with_policy(
        capacity_secs: u64,
        range: CapacityRange,
        policy: Box<dyn CapacityPolicy>,
    ) -> ReplayResult<Self> {
        range.validate(capacity_secs)?;

        Ok(Self {
            segments: VecDeque::new(),
            capacity_secs,
            range,
            policy,
            next_sequence: 0,
            retained_duration: Duration::ZERO,
            retained_bytes: 0,
            total_appended: 0,
            total_evicted: 0,
        })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    /// Add a segment at the tail, then trim the oldest prefix to fit capacity.
    ///
    /// Always succeeds. A single segment longer than the whole capacity is
    /// retained on its own.
    pub fn append(&mut self, segment: Segment) -> Appended {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let segment = segment.with_sequence(sequence);
        self.retained_duration = self
            .retained_duration
            .saturating_add(segment.estimated_duration());
        self.retained_bytes += segment.size_bytes();
        self.total_appended += 1;
        self.segments.push_back(segment);

        let evicted = self.trim();
        Appended { sequence, evicted }
    }

    /// Change the capacity and immediately trim to it.
    ///
    /// Out-of-range values are rejected and the previous capacity stays.
    /// Returns the number of segments evicted.
    pub fn set_capacity(&mut self, seconds: u64) -> ReplayResult<usize> {
        self.range.validate(seconds)?;

        let previous = self.capacity_secs;
        self.capacity_secs = seconds;
        let evicted = self.trim();

        info!(
            "Replay capacity changed: {}s -> {}s ({} segments evicted)",
            previous, seconds, evicted
        );

        Ok(evicted)
    }

    /// Consistent read-only copy of the retained segments
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            segments: self.segments.iter().cloned().collect(),
            capacity_secs: self.capacity_secs,
            total_duration: self.retained_duration,
            total_bytes: self.retained_bytes,
        }
    }

    /// Drop every retained segment. Sequence numbering continues.
    pub fn clear(&mut self) -> usize {
        let cleared = self.segments.len();
        self.segments.clear();
        self.retained_duration = Duration::ZERO;
        self.retained_bytes = 0;

        info!("Replay buffer cleared ({} segments dropped)", cleared);
        cleared
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            segment_count: self.segments.len(),
            retained_secs: self.retained_duration.as_secs_f64(),
            retained_bytes: self.retained_bytes,
            capacity_secs: self.capacity_secs,
            min_capacity_secs: self.range.min_secs,
            max_capacity_secs: self.range.max_secs,
            oldest_sequence: self.segments.front().map(Segment::sequence),
            newest_sequence: self.segments.back().map(Segment::sequence),
            total_appended: self.total_appended,
            total_evicted: self.total_evicted,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn capacity(&self) -> Duration {
        Duration::from_secs(self.capacity_secs)
    }

    pub fn capacity_secs(&self) -> u64 {
        self.capacity_secs
    }

    pub fn capacity_range(&self) -> CapacityRange {
        self.range
    }

    pub fn retained_duration(&self) -> Duration {
        self.retained_duration
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    /// Newest retained segment
    pub fn newest(&self) -> Option<&Segment> {
        self.segments.back()
    }

    fn trim(&mut self) -> usize {
        let capacity = self.capacity();
        let evict = self
            .policy
            .select_evictions(self.segments.make_contiguous(), capacity)
            .min(self.segments.len());

        for segment in self.segments.drain(..evict) {
            self.retained_duration = self
                .retained_duration
                .saturating_sub(segment.estimated_duration());
            self.retained_bytes -= segment.size_bytes();
        }

        if evict > 0 {
            self.total_evicted += evict as u64;
            debug!(
                "Trimmed {} segments ({:.2}s retained of {}s)",
                evict,
                self.retained_duration.as_secs_f64(),
                self.capacity_secs
            );
        }

        evict
    }
}

/// Point-in-time view of the buffer
///
/// Holds its own references to segment payloads, so later appends or
/// evictions never change what a snapshot contains.
#[derive(Debug, Clone)]
pub struct Snapshot {
    segments: Vec<Segment>,
    capacity_secs: u64,
    total_duration: Duration,
    total_bytes: usize,
}

impl Snapshot {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn capacity_secs(&self) -> u64 {
        self.capacity_secs
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

/// Buffer statistics for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferStats {
    /// Number of retained segments
    pub segment_count: usize,

    /// Sum of estimated durations of retained segments
    pub retained_secs: f64,

    /// Sum of payload sizes of retained segments
    pub retained_bytes: usize,

    /// Configured capacity
    pub capacity_secs: u64,

    pub min_capacity_secs: u64,
    pub max_capacity_secs: u64,

    pub oldest_sequence: Option<u64>,
    pub newest_sequence: Option<u64>,

    /// Segments appended since the store was created
    pub total_appended: u64,

    /// Segments evicted by trimming since the store was created
    pub total_evicted: u64,
}
