//! Configuration file support for hologram-pipeline
//!
//! Runtime settings (backend choice, wait bounds, I/O sizing) live in a TOML
//! file; the job itself is described separately in JSON (see [`crate::job`]).
//!
//! # Config File Locations
//!
//! 1. Path specified via `--config` CLI argument
//! 2. `./hologram-pipeline.toml` (current directory)
//! 3. `./.hologram-pipeline.toml` (dotfile)
//! 4. `~/.config/hologram/pipeline.toml` (user config)
//!
//! # Example Config File
//!
//! ```toml
//! [pipeline]
//! job = "data/test.json"
//! backend = "host"
//! fence_timeout_ms = 5000
//! io_threads = 4
//! io_queue_depth = 128
//! output_pattern = "frame{:06}.bin"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_FENCE_TIMEOUT, DEFAULT_IO_QUEUE_DEPTH, DEFAULT_IO_TIMEOUT, DEFAULT_JOB_PATH, DEFAULT_OUTPUT_PATTERN,
};

/// Compute backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host reference backend (always available)
    #[default]
    Host,
    /// GPU backend via wgpu (requires the `wgpu` feature)
    Wgpu,
}

/// Root configuration, sectioned (`[pipeline]`) or flat
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RootConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub direct: Option<PipelineConfig>,
}

/// Pipeline settings loaded from TOML
///
/// All fields are optional. CLI arguments override config file values.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineConfig {
    /// Job description path (default: `data/test.json`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<PathBuf>,

    /// Backend (default: host)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Bound on each fence wait in milliseconds (default: 10000)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fence_timeout_ms: Option<u64>,

    /// Bound on draining the I/O engine in milliseconds (default: 60000)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout_ms: Option<u64>,

    /// I/O worker threads (default: available parallelism)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_threads: Option<usize>,

    /// Maximum commands per I/O batch (default: 256)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_queue_depth: Option<usize>,

    /// File name pattern for streaming outputs (default: `output{:04}.dat`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_pattern: Option<String>,
}

impl PipelineConfig {
    /// Load config from a TOML file (sectioned or flat format)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hologram_pipeline::config::PipelineConfig;
    ///
    /// let config = PipelineConfig::load("hologram-pipeline.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError(path.as_ref().to_path_buf(), e))?;

        let root: RootConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(path.as_ref().to_path_buf(), e))?;

        Ok(root.pipeline.or(root.direct).unwrap_or_default())
    }

    /// Find and load a config file from the standard locations
    ///
    /// Returns `None` if no config file exists.
    pub fn find_and_load() -> Result<Option<Self>, ConfigError> {
        for candidate in ["./hologram-pipeline.toml", "./.hologram-pipeline.toml"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(Some(Self::load(&path)?));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/hologram/pipeline.toml");
            if user_config.exists() {
                return Ok(Some(Self::load(&user_config)?));
            }
        }

        Ok(None)
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeError)?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(path.as_ref().to_path_buf(), e))?;

        Ok(())
    }

    /// Merge with CLI arguments (CLI args take precedence)
    pub fn merge_with_cli(
        &self,
        job: Option<PathBuf>,
        backend: Option<BackendKind>,
        fence_timeout_ms: Option<u64>,
        io_threads: Option<usize>,
    ) -> MergedConfig {
        let default_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);

        MergedConfig {
            job: job
                .or_else(|| self.job.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_JOB_PATH)),
            backend: backend.or(self.backend).unwrap_or_default(),
            fence_timeout: fence_timeout_ms
                .or(self.fence_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FENCE_TIMEOUT),
            io_timeout: self.io_timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_IO_TIMEOUT),
            io_threads: io_threads.or(self.io_threads).unwrap_or(default_threads).max(1),
            io_queue_depth: self.io_queue_depth.unwrap_or(DEFAULT_IO_QUEUE_DEPTH).max(1),
            output_pattern: self
                .output_pattern
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_PATTERN.to_string()),
        }
    }
}

/// Settings after combining config file, CLI args and defaults
#[derive(Debug, Clone)]
pub struct MergedConfig {
    /// Job description path
    pub job: PathBuf,

    /// Selected backend
    pub backend: BackendKind,

    /// Bound on each fence wait
    pub fence_timeout: Duration,

    /// Bound on draining the I/O engine
    pub io_timeout: Duration,

    /// I/O worker threads
    pub io_threads: usize,

    /// Maximum commands per I/O batch
    pub io_queue_depth: usize,

    /// File name pattern for streaming outputs
    pub output_pattern: String,
}

impl Default for MergedConfig {
    fn default() -> Self {
        PipelineConfig::default().merge_with_cli(None, None, None, None)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, #[source] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[source] toml::ser::Error),
}
