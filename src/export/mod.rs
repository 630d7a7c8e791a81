//! Artifact export
//!
//! Concatenates the payloads of a buffer snapshot into one artifact, names
//! it after the export time, and hands it to a sink.

mod sink;

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use tracing::info;

use crate::buffer::Snapshot;
use crate::capture::ContainerFormat;
use crate::error::{ReplayError, ReplayResult};

pub use sink::{ArtifactSink, DirectorySink, SavedArtifact};

/// Characters that are not safe in file names on common filesystems
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// One exported replay
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Concatenated segment payloads, oldest first
    pub bytes: Vec<u8>,
    /// Suggested file name
    pub filename: String,
    /// Container MIME type, passed through from the capture source
    pub mime_type: String,
    pub segment_count: usize,
    pub duration: Duration,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Builds artifacts from buffer snapshots
#[derive(Debug, Clone)]
pub struct Exporter {
    prefix: String,
    container: ContainerFormat,
}

impl Exporter {
    pub fn new(prefix: impl Into<String>, container: ContainerFormat) -> Self {
        Self {
            prefix: prefix.into(),
            container,
        }
    }

    pub fn container(&self) -> &ContainerFormat {
        &self.container
    }

    /// Export a snapshot, naming it after the current time
    pub fn export(&self, snapshot: &Snapshot) -> ReplayResult<Artifact> {
        self.export_at(snapshot, Utc::now())
    }

    /// Export a snapshot, naming it after `at`
    ///
    /// Reads only the snapshot, never the live store.
    pub fn export_at(&self, snapshot: &Snapshot, at: DateTime<Utc>) -> ReplayResult<Artifact> {
        let segments = snapshot.segments();
        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Err(ReplayError::EmptyBuffer);
        };

        let mut bytes = Vec::with_capacity(snapshot.total_bytes());
        for segment in segments {
            bytes.extend_from_slice(segment.payload());
        }

        let artifact = Artifact {
            bytes,
            filename: self.filename_for(at),
            mime_type: self.container.mime_type.clone(),
            segment_count: segments.len(),
            duration: snapshot.total_duration(),
            first_sequence: first.sequence(),
            last_sequence: last.sequence(),
            created_at: at,
        };

        info!(
            "Exported {} ({} segments, {:.1}s, {} bytes)",
            artifact.filename,
            artifact.segment_count,
            artifact.duration.as_secs_f64(),
            artifact.bytes.len()
        );

        Ok(artifact)
    }

    /// File name for an export at `at`, e.g. `replay-2026-10-16T14-28-00.123Z.webm`
    pub fn filename_for(&self, at: DateTime<Utc>) -> String {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let stem = sanitize(&format!("{}-{}", self.prefix, stamp));

        if self.container.extension.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, sanitize(&self.container.extension))
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if RESERVED_CHARS.contains(&c) || c.is_whitespace() || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect()
}
