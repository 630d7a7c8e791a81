//! Capture sessions
//!
//! This module provides the capture side of the replay recorder:
//! - `source`: the capture source contract and factory
//! - `stream`: a source that timeslices any async byte stream
//! - `controller`: the Idle/Capturing state machine feeding the segment store

mod controller;
mod source;
mod stream;

pub use controller::{CaptureController, CaptureNotice, CaptureStatus, ControllerConfig, ControllerStatus};
pub use source::{CaptureEvent, CaptureSource, CaptureSourceFactory, Chunk, ContainerFormat};
pub use stream::StreamSource;
