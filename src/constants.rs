//! Constants and Default Values
//!
//! Numeric defaults used by the loader, compiler and executor. Most of them
//! can be overridden through [`PipelineConfig`](crate::config::PipelineConfig).

use std::time::Duration;

/// Number of buffer generations used for double buffering
///
/// A streaming item owns one staging and one device buffer per generation.
/// Generation `g` is selected by the parity of the pipeline step index.
pub const GENERATIONS: usize = 2;

/// Lead/lag between I/O submission and the compute iteration it feeds
///
/// A file read at step `i` is uploaded at `i + 1` and computed at `i + 2`;
/// results computed at `i` are downloaded at `i + 1` and written at `i + 2`.
/// The executor therefore runs `iterations + 2 * PIPELINE_DEPTH` steps.
pub const PIPELINE_DEPTH: i64 = 2;

/// Iteration count used when `param.iterations` is absent
pub const DEFAULT_ITERATIONS: usize = 8;

/// Name given to data and program items without a `name`
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Total thread groups per dispatch above which compilation warns
///
/// Very large dispatches risk tripping driver watchdogs (TDR). The dispatch
/// is still compiled.
pub const DISPATCH_WARNING_THRESHOLD: u64 = 1_000_000;

/// Default bound on every fence wait
///
/// **Why 10 seconds?**
/// - Long enough for any single dispatch that stays under
///   [`DISPATCH_WARNING_THRESHOLD`]
/// - Short enough that a wedged queue is reported instead of hanging
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on draining the I/O engine
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on latency samples reserved before a run starts
pub const LATENCY_PREALLOC_LIMIT: usize = 4096;

/// Default maximum commands per I/O batch
pub const DEFAULT_IO_QUEUE_DEPTH: usize = 256;

/// Default file name pattern for streaming outputs (`{}` is the zero-padded index)
pub const DEFAULT_OUTPUT_PATTERN: &str = "output{:04}.dat";

/// Job description used when none is given
pub const DEFAULT_JOB_PATH: &str = "data/test.json";

/// Arena alignment of the host reference backend
///
/// Matches the common `minStorageBufferOffsetAlignment` of discrete GPUs so
/// plans compiled against the host backend have the same layout.
pub const HOST_ALIGNMENT: u64 = 256;

/// Entry point expected in WGSL kernels
pub const KERNEL_ENTRY_POINT: &str = "main";
