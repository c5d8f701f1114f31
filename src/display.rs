//! Display Trait Implementations
//!
//! Human-readable output for reports and enums.

use crate::{
    backend::QueueRole,
    compiler::{ItemKind, WorkloadKind},
    config::BackendKind,
    executor::{IoTotals, LatencyStats, RunReport},
    job::{DataAccess, DataSource},
};
use std::fmt;

// Note: PipelineError Display is provided by thiserror::Error derive

/// The `[summary]` line of a run, in seconds
pub struct Summary<'a>(&'a LatencyStats);

impl RunReport {
    /// Total, mean and sample standard deviation of the step latencies
    pub fn summary(&self) -> Summary<'_> {
        Summary(&self.latency)
    }
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[summary] total = {:.6}, mean = {:.6}, sigma = {:.6}",
            self.0.total().as_secs_f64(),
            self.0.mean().as_secs_f64(),
            self.0.std_dev().as_secs_f64()
        )
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ran {} of {} iteration(s) in {} steps on the {} backend ({:.3} s): {}",
            self.iterations,
            self.requested_iterations,
            self.steps,
            self.backend,
            self.elapsed.as_secs_f64(),
            self.io
        )
    }
}

impl fmt::Display for IoTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} I/O command(s) in {} batch(es), {} bytes read, {} bytes written, {} skipped, {} failed",
            self.commands, self.batches, self.bytes_read, self.bytes_written, self.rejected, self.failures
        )
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min(), self.max()) {
            (Some(min), Some(max)) => write!(
                f,
                "{} step(s), mean {:?}, sigma {:?}, min {:?}, max {:?}",
                self.count(),
                self.mean(),
                self.std_dev(),
                min,
                max
            ),
            _ => write!(f, "no steps"),
        }
    }
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueRole::Transfer => write!(f, "transfer"),
            QueueRole::Compute => write!(f, "compute"),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::File => write!(f, "file"),
            DataSource::Directory => write!(f, "directory"),
            DataSource::Memory => write!(f, "memory"),
        }
    }
}

impl fmt::Display for DataAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAccess::Read => write!(f, "read"),
            DataAccess::Write => write!(f, "write"),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Memory => write!(f, "memory"),
            ItemKind::UniqueRead => write!(f, "unique read"),
            ItemKind::UniqueWrite => write!(f, "unique write"),
            ItemKind::StreamingRead => write!(f, "streaming read"),
            ItemKind::StreamingWrite => write!(f, "streaming write"),
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Unique => write!(f, "unique"),
            WorkloadKind::Streaming => write!(f, "streaming"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Host => write!(f, "host"),
            BackendKind::Wgpu => write!(f, "wgpu"),
        }
    }
}
