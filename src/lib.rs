//! # Hologram Pipeline - Double-Buffered Streaming Compute
//!
//! Streams data from disk through a chain of compute kernels and back to
//! disk, overlapping file I/O, host↔device transfers and kernel execution
//! of consecutive iterations.
//!
//! - **Job descriptions** in JSON name the data items and the kernel chain
//! - **Per-class arenas** hold every buffer; handles are `(class, offset, size)`
//! - **Two generations** of staging and device buffers alternate by step parity
//! - **Fence protocol** keeps I/O, transfer and compute off each other's buffers
//!
//! ## Pipeline
//!
//! ```text
//!   files ──read──► staging ──upload──► device ──kernels──► device
//!                   (CpuWrite)          (GpuRead)            (GpuWrite)
//!                                                              │
//!   files ◄──write── staging ◄────────download─────────────────┘
//!                    (CpuRead)
//! ```
//!
//! A file read at step `i` is uploaded at `i + 1` and computed at `i + 2`;
//! its results are downloaded one step later and written one step after
//! that. A run of `n` iterations takes `n + 4` steps.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hologram_pipeline::{load_job, run_job, HostBackend, MergedConfig};
//!
//! let job = load_job("data/test.json")?;
//! let mut backend = HostBackend::new();
//! let report = run_job(&job, &mut backend, &MergedConfig::default())?;
//! println!("{}", report.summary());
//! # Ok::<(), hologram_pipeline::PipelineError>(())
//! ```
//!
//! ## Architecture
//!
//! - **job** - Job description types and loader
//! - **memory** - Access classes, host regions, arena allocator
//! - **io** - Directory scans and the batched asynchronous I/O engine
//! - **backend** - Compute backend trait, host backend, optional wgpu backend
//! - **compiler** - Job → execution plan
//! - **executor** - Step schedule, fence protocol, latency statistics
//!
//! ## Features
//!
//! - `wgpu` - GPU backend on wgpu compute pipelines (optional)

// Error handling
mod error;
pub use error::{ConfigIssue, IssueKind, PipelineError, Result};

// Display implementations
mod display;
pub use display::Summary;

// Constants and defaults
pub mod constants;
pub use constants::{DEFAULT_ITERATIONS, GENERATIONS, PIPELINE_DEPTH};

// Configuration
pub mod config;
pub use config::{BackendKind, ConfigError, MergedConfig, PipelineConfig};

// Core modules
pub mod backend;
pub mod io;
pub mod job;
pub mod memory;

// Pipeline modules
pub mod compiler;
pub mod executor;

// Re-exports for convenience
pub use backend::{
    Command, CommandList, ComputeBackend, DebugUtils, ExecutionMode, HostBackend, KernelRegistry, QueueRole,
};
#[cfg(feature = "wgpu")]
pub use backend::WgpuBackend;
pub use compiler::{ExecutionPlan, FileList, IoWorkload, WorkloadCompiler, WorkloadKind};
pub use executor::{LatencyStats, PipelineExecutor, RunReport, Schedule, StepOp, StepPlan};
pub use io::{AsyncIoEngine, IoBatch};
pub use job::{load_job, DataAccess, DataItem, DataSource, JobLoader, JobSpec, Loaded, ProgramItem};
pub use memory::{AccessClass, BufferBinding, MemoryPoolAllocator};

/// Compile `job` for `backend` and run it with the given settings
pub fn run_job(job: &JobSpec, backend: &mut dyn ComputeBackend, settings: &MergedConfig) -> Result<RunReport> {
    let debug = backend.debug_utils();

    let (plan, _) = WorkloadCompiler::new(&mut *backend)
        .with_debug(debug.clone())
        .with_output_pattern(settings.output_pattern.as_str())
        .compile(job)?;

    let io = AsyncIoEngine::new(settings.io_threads)?
        .with_queue_depth(settings.io_queue_depth)
        .with_timeout(settings.io_timeout);

    PipelineExecutor::new(backend, io)
        .with_fence_timeout(settings.fence_timeout)
        .with_debug(debug)
        .run(&plan)
}
