//! Rolling replay buffer
//!
//! Segments are appended in capture order and the oldest ones are evicted
//! as soon as the retained duration exceeds the configured capacity:
//! - `segment`: immutable captured chunk plus its metadata
//! - `duration`: turns chunk timing and size into a duration estimate
//! - `policy`: decides which prefix to evict for a given budget
//! - `store`: the ring buffer itself and its shared handle

mod duration;
mod policy;
mod segment;
mod store;

pub use duration::{DurationEstimator, DurationMode};
pub use policy::{select_evictions, CapacityPolicy, CapacityRange, NewestSuffix};
pub use segment::{DurationSource, Segment};
pub use store::{Appended, BufferStats, SegmentStore, SharedStore, Snapshot};
