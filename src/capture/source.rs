use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use super::stream::StreamSource;
use crate::config::{CaptureConfig, CaptureKind, ReplayConfig};

/// Raw chunk of encoded media as delivered by a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Encoded media bytes (opaque to the buffer)
    pub payload: Vec<u8>,
    /// Milliseconds since the source was acquired, taken when the chunk became ready
    pub timestamp_ms: u64,
}

/// Event emitted by a capture session
///
/// The channel closing without a `Failed` event means the source finished
/// normally (for example, end of input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A chunk of media is ready
    Chunk(Chunk),
    /// The source hit an error; no further events follow
    Failed(String),
}

/// Container label of the encoded stream, passed through to exported artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFormat {
    /// MIME type (e.g. "video/webm")
    pub mime_type: String,
    /// File extension without the dot (e.g. "webm")
    pub extension: String,
}

impl Default for ContainerFormat {
    fn default() -> Self {
        Self {
            mime_type: "video/webm".to_string(),
            extension: "webm".to_string(),
        }
    }
}

/// Capture source trait
///
/// The source handle is acquired once, survives any number of start/stop
/// cycles, and is released on teardown.
///
/// Implementations:
/// - `StreamSource::file`: replays a media file at the configured bitrate
/// - `StreamSource::command`: reads an encoder process's stdout
/// - `StreamSource::from_reader`: any async byte reader
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    /// Acquire the underlying device, file or process
    async fn acquire(&mut self) -> Result<()>;

    /// Start a session emitting one chunk per `interval`
    ///
    /// Returns a channel receiver that will receive capture events
    async fn start_session(&mut self, interval: Duration) -> Result<mpsc::Receiver<CaptureEvent>>;

    /// End the session and hand back the partial chunk accumulated since the last tick
    async fn stop_session(&mut self) -> Result<Option<Chunk>>;

    /// Release the handle. Safe to call more than once.
    fn release(&mut self);

    /// Whether the handle is currently held
    fn is_acquired(&self) -> bool;

    /// Container label of the produced media
    fn container(&self) -> &ContainerFormat;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Capture source factory
pub struct CaptureSourceFactory;

impl CaptureSourceFactory {
    /// Create a capture source from configuration
    pub fn create(capture: &CaptureConfig, replay: &ReplayConfig) -> Result<Box<dyn CaptureSource>> {
        let container = capture.container();

        match capture.kind {
            CaptureKind::File => {
                let Some(path) = &capture.path else {
                    bail!("capture.path is required for the file capture source");
                };
                Ok(Box::new(StreamSource::file(
                    path,
                    replay.bytes_per_second,
                    container,
                )))
            }

            CaptureKind::Command => {
                let Some(program) = &capture.program else {
                    bail!("capture.program is required for the command capture source");
                };
                Ok(Box::new(StreamSource::command(
                    program,
                    capture.args.clone(),
                    container,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_default_is_webm() {
        let container = ContainerFormat::default();
        assert_eq!(container.mime_type, "video/webm");
        assert_eq!(container.extension, "webm");
    }

    #[test]
    fn test_factory_requires_path_for_file_source() {
        let capture = CaptureConfig {
            kind: CaptureKind::File,
            path: None,
            ..CaptureConfig::default()
        };

        let err = CaptureSourceFactory::create(&capture, &ReplayConfig::default())
            .err()
            .expect("missing path must be rejected");
        assert!(err.to_string().contains("capture.path"));
    }

    #[test]
    fn test_factory_requires_program_for_command_source() {
        let capture = CaptureConfig {
            kind: CaptureKind::Command,
            program: None,
            ..CaptureConfig::default()
        };

        assert!(CaptureSourceFactory::create(&capture, &ReplayConfig::default()).is_err());
    }

    #[test]
    fn test_factory_builds_named_sources() {
        let file = CaptureConfig {
            kind: CaptureKind::File,
            path: Some("fixtures/sample.webm".to_string()),
            ..CaptureConfig::default()
        };
        let source = CaptureSourceFactory::create(&file, &ReplayConfig::default()).unwrap();
        assert_eq!(source.name(), "file:fixtures/sample.webm");
        assert!(!source.is_acquired());

        let command = CaptureConfig {
            kind: CaptureKind::Command,
            program: Some("ffmpeg".to_string()),
            args: vec!["-f".to_string(), "webm".to_string(), "-".to_string()],
            mime_type: "video/x-matroska".to_string(),
            extension: "mkv".to_string(),
            ..CaptureConfig::default()
        };
        let source = CaptureSourceFactory::create(&command, &ReplayConfig::default()).unwrap();
        assert_eq!(source.name(), "command:ffmpeg");
        assert_eq!(source.container().extension, "mkv");
    }
}
