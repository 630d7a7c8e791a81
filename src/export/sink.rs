use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::Artifact;
use crate::error::{ReplayError, ReplayResult};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Receipt for a delivered artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedArtifact {
    pub filename: String,
    /// Where the sink put it (a path for the directory sink)
    pub location: String,
    pub mime_type: String,
    pub bytes: usize,
    pub segment_count: usize,
    pub duration_secs: f64,
}

/// Destination for exported artifacts
#[async_trait::async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn deliver(&self, artifact: &Artifact) -> ReplayResult<SavedArtifact>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}

/// Writes artifacts into a directory, creating it on first use
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    name: String,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("dir:{}", dir.display()),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create `filename` in the directory, or `stem-N.ext` if it is taken.
    /// Existing replays are never overwritten.
    async fn create_unique(&self, filename: &str) -> ReplayResult<(String, File)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = numbered(filename, attempt);
            let path = self.dir.join(&candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{} already exists, trying another name", path.display());
                }
                Err(e) => {
                    return Err(ReplayError::Storage {
                        reason: format!("Failed to create {}: {}", path.display(), e),
                    })
                }
            }
        }

        Err(ReplayError::Storage {
            reason: format!(
                "No free file name for {} in {}",
                filename,
                self.dir.display()
            ),
        })
    }
}

/// `replay.webm` -> `replay-2.webm` for attempt 2; attempt 0 is the name itself
fn numbered(filename: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, attempt, ext),
        _ => format!("{}-{}", filename, attempt),
    }
}

#[async_trait::async_trait]
impl ArtifactSink for DirectorySink {
    async fn deliver(&self, artifact: &Artifact) -> ReplayResult<SavedArtifact> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| ReplayError::Storage {
            reason: format!("Failed to create output directory {}: {}", self.dir.display(), e),
        })?;

        let (filename, mut file) = self.create_unique(&artifact.filename).await?;
        let path = self.dir.join(&filename);

        let write = async {
            file.write_all(&artifact.bytes).await?;
            file.flush().await
        };
        write.await.map_err(|e| ReplayError::Storage {
            reason: format!("Failed to write {}: {}", path.display(), e),
        })?;

        info!(
            "Saved replay to {} ({} bytes)",
            path.display(),
            artifact.bytes.len()
        );

        Ok(SavedArtifact {
            filename,
            location: path.display().to_string(),
            mime_type: artifact.mime_type.clone(),
            bytes: artifact.bytes.len(),
            segment_count: artifact.segment_count,
            duration_secs: artifact.duration.as_secs_f64(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
