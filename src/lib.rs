pub mod buffer;
pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod http;

pub use buffer::{
    BufferStats, CapacityPolicy, CapacityRange, DurationEstimator, DurationMode, NewestSuffix,
    Segment, SegmentStore, SharedStore, Snapshot,
};
pub use capture::{
    CaptureController, CaptureEvent, CaptureNotice, CaptureSource, CaptureSourceFactory,
    CaptureStatus, Chunk, ContainerFormat, ControllerConfig, StreamSource,
};
pub use config::Config;
pub use error::{ReplayError, ReplayResult};
pub use export::{Artifact, ArtifactSink, DirectorySink, Exporter, SavedArtifact};
pub use http::{create_router, AppState};
