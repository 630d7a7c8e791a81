use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use super::segment::Segment;
use crate::error::{ReplayError, ReplayResult};

/// Retention policy for the replay buffer
///
/// Implementations decide how many of the oldest segments must go so that
/// the rest fits the capacity budget. Eviction is always a prefix cut.
pub trait CapacityPolicy: Send + Sync + Debug {
    /// Count of oldest segments to drop. `segments` is ordered oldest first.
    fn select_evictions(&self, segments: &[Segment], capacity: Duration) -> usize;
}

/// Keep the longest run of newest segments that fits the budget
///
/// If the newest segment alone is over budget it is kept by itself, so
/// trimming never empties a non-empty buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestSuffix;

impl CapacityPolicy for NewestSuffix {
    fn select_evictions(&self, segments: &[Segment], capacity: Duration) -> usize {
        let mut total = Duration::ZERO;
        let mut kept = 0;

        for segment in segments.iter().rev() {
            total = total.saturating_add(segment.estimated_duration());
            if total > capacity {
                break;
            }
            kept += 1;
        }

        let kept = kept.max(1).min(segments.len());
        segments.len() - kept
    }
}

/// Evictions under the default policy
pub fn select_evictions(segments: &[Segment], capacity: Duration) -> usize {
    NewestSuffix.select_evictions(segments, capacity)
}

/// Accepted capacity range in whole seconds (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for CapacityRange {
    fn default() -> Self {
        Self {
            min_secs: 5,
            max_secs: 30,
        }
    }
}

impl CapacityRange {
    /// Reject capacities outside the range instead of clamping them
    pub fn validate(&self, seconds: u64) -> ReplayResult<Duration> {
        if seconds == 0 || seconds < self.min_secs || seconds > self.max_secs {
            return Err(ReplayError::InvalidCapacity {
                requested: seconds,
                min: self.min_secs,
                max: self.max_secs,
            });
        }

        Ok(Duration::from_secs(seconds))
    }

    pub fn contains(&self, seconds: u64) -> bool {
        self.validate(seconds).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::segment::DurationSource;

    fn segments(durations_secs: &[u64]) -> Vec<Segment> {
        durations_secs
            .iter()
            .enumerate()
            .map(|(i, secs)| {
                Segment::new(
                    vec![i as u8],
                    i as u64 * 1000,
                    Duration::from_secs(*secs),
                    DurationSource::Elapsed,
                )
                .with_sequence(i as u64)
            })
            .collect()
    }

    #[test]
    fn test_worked_example_keeps_newest_suffix() {
        // A, B, C, D at 5s each under 12s: C + D = 10s fits, B + C + D = 15s does not
        let segs = segments(&[5, 5, 5, 5]);
        assert_eq!(select_evictions(&segs, Duration::from_secs(12)), 2);
    }

    #[test]
    fn test_exact_fit_keeps_everything() {
        let segs = segments(&[4, 4, 4]);
        assert_eq!(select_evictions(&segs, Duration::from_secs(12)), 0);
    }

    #[test]
    fn test_empty_input_evicts_nothing() {
        assert_eq!(select_evictions(&[], Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_oversized_newest_segment_is_kept_alone() {
        let segs = segments(&[1, 2, 40]);
        assert_eq!(select_evictions(&segs, Duration::from_secs(10)), 2);

        let single = segments(&[40]);
        assert_eq!(select_evictions(&single, Duration::from_secs(10)), 0);
    }

    #[test]
    fn test_scan_stops_at_first_overflow() {
        // The 1s segment before the 9s one would fit on its own, but retention
        // is a contiguous suffix, so it goes along with everything older.
        let segs = segments(&[1, 9, 2, 3]);
        assert_eq!(select_evictions(&segs, Duration::from_secs(6)), 2);
    }

    #[test]
    fn test_capacity_range_validation() {
        let range = CapacityRange::default();

        assert_eq!(range.validate(5).unwrap(), Duration::from_secs(5));
        assert_eq!(range.validate(30).unwrap(), Duration::from_secs(30));
        assert!(range.contains(15));

        assert_eq!(
            range.validate(4),
            Err(ReplayError::InvalidCapacity {
                requested: 4,
                min: 5,
                max: 30
            })
        );
        assert!(range.validate(31).is_err());
        assert!(range.validate(0).is_err());
    }

    #[test]
    fn test_zero_minimum_still_rejects_zero() {
        let range = CapacityRange {
            min_secs: 0,
            max_secs: 10,
        };
        assert!(range.validate(0).is_err());
        assert!(range.validate(1).is_ok());
    }
}
