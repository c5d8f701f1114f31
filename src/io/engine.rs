//! Batched asynchronous file I/O
//!
//! ```text
//!   batch.begin()                      engine.submit(&mut batch)
//!   batch.add_read(span, path, ..)  ─►  commands run on the worker pool
//!   batch.add_write(span, path, ..)     engine.wait_idle() → IoCompletion
//! ```
//!
//! Opening a file happens while the batch is built, so a missing input only
//! drops that one command. Failures while reading or writing are counted
//! and logged; they never fail the batch.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::constants::{DEFAULT_IO_QUEUE_DEPTH, DEFAULT_IO_TIMEOUT};
use crate::error::{PipelineError, Result};
use crate::memory::HostSpan;

type AddResult = std::result::Result<(), IoCommandError>;

/// Direction of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// File → host memory
    Read,
    /// Host memory → file
    Write,
}

/// Why a command was not added to a batch
#[derive(Debug, thiserror::Error)]
pub enum IoCommandError {
    #[error("can't open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch is full ({capacity} commands)")]
    QueueFull { capacity: usize },
}

struct IoCommand {
    op: IoOp,
    file: Arc<File>,
    path: PathBuf,
    span: HostSpan,
    size: u64,
    file_offset: u64,
}

/// Reusable list of I/O commands
pub struct IoBatch {
    commands: Vec<IoCommand>,
    capacity: usize,
    rejected: usize,
}

impl IoBatch {
    fn new(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            capacity,
            rejected: 0,
        }
    }

    /// Reset the batch to zero commands
    pub fn begin(&mut self) {
        self.commands.clear();
        self.rejected = 0;
    }

    /// Read `size` bytes at `file_offset` of `path` into `span`
    pub fn add_read(&mut self, span: HostSpan, path: &Path, size: u64, file_offset: u64) -> AddResult {
        self.add(IoOp::Read, span, path, size, file_offset)
    }

    /// Write `size` bytes of `span` to `path` at `file_offset` (file is created/truncated)
    pub fn add_write(&mut self, span: HostSpan, path: &Path, size: u64, file_offset: u64) -> AddResult {
        self.add(IoOp::Write, span, path, size, file_offset)
    }

    fn add(&mut self, op: IoOp, span: HostSpan, path: &Path, size: u64, file_offset: u64) -> AddResult {
        if self.commands.len() >= self.capacity {
            self.rejected += 1;
            tracing::warn!("I/O batch full, dropping {:?} of {}", op, path.display());
            return Err(IoCommandError::QueueFull {
                capacity: self.capacity,
            });
        }

        let opened = match op {
            IoOp::Read => File::open(path),
            IoOp::Write => OpenOptions::new().write(true).create(true).truncate(true).open(path),
        };
        let file = match opened {
            Ok(file) => file,
            Err(source) => {
                self.rejected += 1;
                tracing::warn!("Skipping {:?} of {}: {}", op, path.display(), source);
                return Err(IoCommandError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let size = size.min(span.len());
        self.commands.push(IoCommand {
            op,
            file: Arc::new(file),
            path: path.to_path_buf(),
            span,
            size,
            file_offset,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands dropped since the last `begin`
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

/// Summary of one drained batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCompletion {
    pub commands: usize,
    pub failures: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Default)]
struct TrackerState {
    remaining: usize,
    completion: IoCompletion,
}

#[derive(Default)]
struct Tracker {
    state: Mutex<TrackerState>,
    done: Condvar,
}

impl Tracker {
    fn finish(&self, op: IoOp, result: std::io::Result<u64>) {
        let mut state = self.state.lock();
        match (op, result) {
            (IoOp::Read, Ok(n)) => state.completion.bytes_read += n,
            (IoOp::Write, Ok(n)) => state.completion.bytes_written += n,
            (_, Err(_)) => state.completion.failures += 1,
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            self.done.notify_all();
        }
    }
}

struct InFlight {
    tracker: Arc<Tracker>,
    // Keeps the batch's descriptors open until it is drained
    _files: Vec<Arc<File>>,
}

/// Asynchronous I/O engine with at most one outstanding batch
pub struct AsyncIoEngine {
    pool: rayon::ThreadPool,
    queue_depth: usize,
    timeout: Duration,
    outstanding: Option<InFlight>,
}

impl AsyncIoEngine {
    /// Engine with `threads` workers and the default queue depth
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("hologram-io-{}", i))
            .build()
            .map_err(|e| PipelineError::IoEngine(format!("failed to start I/O workers: {}", e)))?;

        Ok(Self {
            pool,
            queue_depth: DEFAULT_IO_QUEUE_DEPTH,
            timeout: DEFAULT_IO_TIMEOUT,
            outstanding: None,
        })
    }

    /// Maximum commands per batch
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Bound on `wait_idle`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// New empty batch sized to the queue depth
    pub fn allocate_batch(&self) -> IoBatch {
        IoBatch::new(self.queue_depth)
    }

    /// True while a submitted batch has not been drained
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Start executing `batch`; returns `false` if another batch is outstanding
    ///
    /// The batch's commands move to the workers; the batch itself is left
    /// empty and can be reused after `begin`.
    pub fn submit(&mut self, batch: &mut IoBatch) -> bool {
        if self.outstanding.is_some() {
            tracing::debug!("I/O submit rejected: a batch is still outstanding");
            return false;
        }

        let commands: Vec<IoCommand> = batch.commands.drain(..).collect();
        let tracker = Arc::new(Tracker::default());
        tracker.state.lock().remaining = commands.len();
        tracker.state.lock().completion.commands = commands.len();
        let files = commands.iter().map(|c| Arc::clone(&c.file)).collect();

        for command in commands {
            let tracker = Arc::clone(&tracker);
            self.pool.spawn(move || {
                let result = execute(&command);
                if let Err(e) = &result {
                    tracing::warn!("{:?} of {} failed: {}", command.op, command.path.display(), e);
                }
                // Release the descriptor before signalling completion
                let op = command.op;
                drop(command);
                tracker.finish(op, result);
            });
        }

        self.outstanding = Some(InFlight { tracker, _files: files });
        true
    }

    /// Block until the outstanding batch completes, then close its files
    ///
    /// A no-op success when nothing is outstanding.
    pub fn wait_idle(&mut self) -> Result<IoCompletion> {
        let Some(in_flight) = self.outstanding.as_ref() else {
            return Ok(IoCompletion::default());
        };

        let deadline = Instant::now() + self.timeout;
        let completion = {
            let mut state = in_flight.tracker.state.lock();
            while state.remaining > 0 {
                if in_flight.tracker.done.wait_until(&mut state, deadline).timed_out() && state.remaining > 0 {
                    return Err(PipelineError::Timeout {
                        what: format!("{} outstanding I/O command(s)", state.remaining),
                        waited: self.timeout,
                    });
                }
            }
            state.completion
        };

        self.outstanding = None;
        Ok(completion)
    }
}

impl Drop for AsyncIoEngine {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            tracing::error!("I/O engine dropped with work in flight: {}", e);
        }
    }
}

fn execute(command: &IoCommand) -> std::io::Result<u64> {
    match command.op {
        IoOp::Read => {
            // SAFETY: the span belongs to a staging buffer that no transfer
            // reads until this batch has been drained
            let buf = unsafe { command.span.as_mut_slice() };
            let buf = &mut buf[..command.size as usize];
            let n = read_full_at(&command.file, buf, command.file_offset)?;
            if n < buf.len() {
                tracing::debug!(
                    "Short read of {}: {} of {} bytes, rest left stale",
                    command.path.display(),
                    n,
                    buf.len()
                );
            }
            Ok(n as u64)
        }
        IoOp::Write => {
            // SAFETY: the span was filled by a download whose fence has been
            // waited on; nothing writes it until this batch has been drained
            let buf = unsafe { command.span.as_slice() };
            let buf = &buf[..command.size as usize];
            write_all_at(&command.file, buf, command.file_offset)?;
            Ok(buf.len() as u64)
        }
    }
}

/// Read until `buf` is full or end of file; returns bytes read
#[cfg(unix)]
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.write_all_at(buf, offset)
}

#[cfg(not(unix))]
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};

    let mut handle = file;
    handle.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match handle.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(not(unix))]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};

    let mut handle = file;
    handle.seek(SeekFrom::Start(offset))?;
    handle.write_all(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostRegion;
    use std::fs;
    use tempfile::TempDir;

    fn span(region: &Arc<HostRegion>, offset: u64, len: u64) -> HostSpan {
        HostSpan::new(Arc::clone(region), offset, len)
    }

    #[test]
    fn test_read_into_span() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.dat");
        fs::write(&path, b"abcdefgh").unwrap();

        let region = HostRegion::new(64).unwrap();
        let mut engine = AsyncIoEngine::new(2).unwrap();
        let mut batch = engine.allocate_batch();
        batch.begin();
        batch.add_read(span(&region, 8, 8), &path, 8, 0).unwrap();

        assert!(engine.submit(&mut batch));
        let completion = engine.wait_idle().unwrap();

        assert_eq!(completion.commands, 1);
        assert_eq!(completion.bytes_read, 8);
        assert_eq!(unsafe { region.slice(8, 8) }, b"abcdefgh");
    }

    #[test]
    fn test_wait_idle_releases_descriptors() {
        let dir = TempDir::new().unwrap();
        let region = HostRegion::new(64).unwrap();
        let mut engine = AsyncIoEngine::new(4).unwrap();
        let mut batch = engine.allocate_batch();
        for i in 0..4u64 {
            let path = dir.path().join(format!("f{}.dat", i));
            fs::write(&path, [i as u8; 16]).unwrap();
            batch.add_read(span(&region, i * 16, 16), &path, 16, 0).unwrap();
        }

        assert!(engine.submit(&mut batch));
        let files: Vec<Arc<File>> = engine.outstanding.as_ref().unwrap()._files.iter().map(Arc::clone).collect();
        assert_eq!(files.len(), 4);
        engine.wait_idle().unwrap();

        for file in &files {
            assert_eq!(Arc::strong_count(file), 1);
        }
    }

    #[test]
    fn test_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.dat");

        let region = HostRegion::new(16).unwrap();
        unsafe { region.slice_mut(0, 4) }.copy_from_slice(b"wxyz");

        let mut engine = AsyncIoEngine::new(1).unwrap();
        let mut batch = engine.allocate_batch();
        batch.add_write(span(&region, 0, 4), &path, 4, 0).unwrap();
        assert!(engine.submit(&mut batch));
        assert_eq!(engine.wait_idle().unwrap().bytes_written, 4);

        assert_eq!(fs::read(&path).unwrap(), b"wxyz");
    }

    #[test]
    fn test_missing_file_skips_command() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.dat");
        fs::write(&good, [7u8; 4]).unwrap();

        let region = HostRegion::new(8).unwrap();
        let engine = AsyncIoEngine::new(1).unwrap();
        let mut batch = engine.allocate_batch();

        let err = batch.add_read(span(&region, 0, 4), &dir.path().join("missing.dat"), 4, 0);
        assert!(matches!(err, Err(IoCommandError::Open { .. })));
        batch.add_read(span(&region, 4, 4), &good, 4, 0).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rejected(), 1);
    }

    #[test]
    fn test_single_outstanding_batch() {
        let region = HostRegion::new(8).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.dat");
        fs::write(&path, [1u8; 8]).unwrap();

        let mut engine = AsyncIoEngine::new(1).unwrap();
        let mut first = engine.allocate_batch();
        let mut second = engine.allocate_batch();
        first.add_read(span(&region, 0, 8), &path, 8, 0).unwrap();

        assert!(engine.submit(&mut first));
        assert!(engine.is_busy());
        assert!(!engine.submit(&mut second));

        engine.wait_idle().unwrap();
        assert!(!engine.is_busy());
        assert!(engine.submit(&mut second));
        engine.wait_idle().unwrap();
    }

    #[test]
    fn test_wait_idle_without_work() {
        let mut engine = AsyncIoEngine::new(1).unwrap();
        assert_eq!(engine.wait_idle().unwrap(), IoCompletion::default());
    }

    #[test]
    fn test_short_read_leaves_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.dat");
        fs::write(&path, [9u8; 3]).unwrap();

        let region = HostRegion::new(8).unwrap();
        unsafe { region.slice_mut(0, 8) }.fill(0xEE);

        let mut engine = AsyncIoEngine::new(1).unwrap();
        let mut batch = engine.allocate_batch();
        batch.add_read(span(&region, 0, 8), &path, 8, 0).unwrap();
        engine.submit(&mut batch);
        let completion = engine.wait_idle().unwrap();

        assert_eq!(completion.bytes_read, 3);
        assert_eq!(completion.failures, 0);
        assert_eq!(unsafe { region.slice(0, 8) }, &[9, 9, 9, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE]);
    }

    #[test]
    fn test_queue_depth_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.dat");
        fs::write(&path, [1u8; 4]).unwrap();
        let region = HostRegion::new(8).unwrap();

        let engine = AsyncIoEngine::new(1).unwrap().with_queue_depth(1);
        let mut batch = engine.allocate_batch();
        batch.add_read(span(&region, 0, 4), &path, 4, 0).unwrap();
        let err = batch.add_read(span(&region, 4, 4), &path, 4, 0).unwrap_err();
        assert!(matches!(err, IoCommandError::QueueFull { capacity: 1 }));
    }
}
