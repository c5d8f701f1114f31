//! Asynchronous file I/O
//!
//! [`AsyncIoEngine`] executes batches of positioned reads and writes between
//! files and host arena memory on a small worker pool. At most one batch is
//! outstanding; the executor drains it before submitting the next one.
//!
//! [`scan_directory`] enumerates the inputs of streaming-read items.

mod engine;
mod scan;

pub use engine::{AsyncIoEngine, IoBatch, IoCommandError, IoCompletion, IoOp};
pub use scan::{scan_directory, sorted_files, DirEntryInfo, DirScan};
