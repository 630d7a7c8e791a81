use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the replay buffer engine.
///
/// Every variant is a local, recoverable condition reported to the immediate
/// caller. None of them are fatal to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayError {
    /// The capture source reported an error mid-session
    #[error("capture failed: {reason}")]
    CaptureFailed { reason: String },

    /// The capture source delivered a chunk whose timestamp does not advance
    #[error("out-of-order segment: received {received_ms}ms after {previous_ms}ms")]
    OutOfOrderSegment { previous_ms: u64, received_ms: u64 },

    /// Export was requested while the buffer holds nothing
    #[error("replay buffer is empty")]
    EmptyBuffer,

    /// Capacity outside the accepted range
    #[error("invalid capacity {requested}s (accepted range {min}s..={max}s)")]
    InvalidCapacity { requested: u64, min: u64, max: u64 },

    /// The capture source could not be acquired or started
    #[error("capture source error: {reason}")]
    Source { reason: String },

    /// Delivering an artifact to its sink failed
    #[error("storage error: {reason}")]
    Storage { reason: String },
}

impl ReplayError {
    pub fn capture_failed(reason: impl Into<String>) -> Self {
        Self::CaptureFailed {
            reason: reason.into(),
        }
    }

    pub fn source(reason: impl Into<String>) -> Self {
        Self::Source {
            reason: reason.into(),
        }
    }
}

pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
