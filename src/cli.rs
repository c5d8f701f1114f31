//! Command-line argument parsing for hologram-pipeline

use clap::{Parser, ValueEnum};
use hologram_pipeline::BackendKind;
use std::path::PathBuf;

/// Hologram Pipeline - Stream files through compute kernels
#[derive(Parser, Debug)]
#[command(name = "hologram-pipeline")]
#[command(author, version, about = "Hologram Pipeline - Stream files through compute kernels", long_about = None)]
pub struct Cli {
    /// Job description (JSON); defaults to the config file's `job` or data/test.json
    #[arg(value_name = "JOB")]
    pub job: Option<PathBuf>,

    /// Settings file (TOML); searched in the usual places when omitted
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Compute backend
    #[arg(short, long, value_enum)]
    pub backend: Option<Backend>,

    /// Bound on every fence wait, in milliseconds
    #[arg(long, value_name = "MS")]
    pub fence_timeout_ms: Option<u64>,

    /// I/O worker threads
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Run host submissions only when their fence is waited on
    #[arg(long)]
    pub deferred: bool,

    /// Label kernels, buffers and steps in the log
    #[arg(long)]
    pub debug_labels: bool,

    /// Print the run report in addition to the summary line
    #[arg(long)]
    pub stats: bool,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// CPU reference backend
    Host,
    /// GPU backend (requires the `wgpu` feature)
    Wgpu,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Host => BackendKind::Host,
            Backend::Wgpu => BackendKind::Wgpu,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
