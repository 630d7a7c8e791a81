use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::buffer::{CapacityRange, DurationMode};
use crate::capture::{ContainerFormat, ControllerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub replay: ReplayConfig,
    pub capture: CaptureConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "instant-replay".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum retained duration
    pub capacity_secs: u64,
    pub min_capacity_secs: u64,
    pub max_capacity_secs: u64,
    /// How often the capture source emits a chunk
    pub chunk_interval_ms: u64,
    /// Capture bitrate, used when chunk timing is unavailable
    pub bytes_per_second: u64,
    pub duration_mode: DurationMode,
    /// Artifact file name prefix
    pub filename_prefix: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity_secs: 15,
            min_capacity_secs: 5,
            max_capacity_secs: 30,
            chunk_interval_ms: 1000,
            bytes_per_second: 100_000,
            duration_mode: DurationMode::Elapsed,
            filename_prefix: "replay".to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn capacity_range(&self) -> CapacityRange {
        CapacityRange {
            min_secs: self.min_capacity_secs,
            max_secs: self.max_capacity_secs,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            chunk_interval: Duration::from_millis(self.chunk_interval_ms),
            duration_mode: self.duration_mode,
            bytes_per_second: self.bytes_per_second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Replay a media file as a live feed
    #[default]
    File,
    /// Read an encoder process's stdout
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub kind: CaptureKind,
    /// Input file for the file source
    pub path: Option<String>,
    /// Encoder program for the command source
    pub program: Option<String>,
    pub args: Vec<String>,
    /// Container label of the captured stream
    pub mime_type: String,
    pub extension: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let container = ContainerFormat::default();
        Self {
            kind: CaptureKind::File,
            path: None,
            program: None,
            args: Vec::new(),
            mime_type: container.mime_type,
            extension: container.extension,
        }
    }
}

impl CaptureConfig {
    pub fn container(&self) -> ContainerFormat {
        ContainerFormat {
            mime_type: self.mime_type.clone(),
            extension: self.extension.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for replays saved to disk
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "recordings".to_string(),
        }
    }
}

impl Config {
    /// Load from a config file (path without extension) plus
    /// `INSTANT_REPLAY__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("INSTANT_REPLAY").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML text, without environment overrides
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let replay = &self.replay;

        if replay.min_capacity_secs == 0 || replay.min_capacity_secs > replay.max_capacity_secs {
            bail!(
                "replay capacity range {}..={} is invalid",
                replay.min_capacity_secs,
                replay.max_capacity_secs
            );
        }
        if let Err(e) = replay.capacity_range().validate(replay.capacity_secs) {
            bail!("replay.capacity_secs: {}", e);
        }
        if replay.chunk_interval_ms == 0 {
            bail!("replay.chunk_interval_ms must be positive");
        }
        if replay.bytes_per_second == 0 {
            bail!("replay.bytes_per_second must be positive");
        }

        Ok(())
    }
}
