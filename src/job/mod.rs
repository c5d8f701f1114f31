//! Job descriptions
//!
//! A job names the data items streamed through the pipeline and the chain of
//! kernels applied to them:
//!
//! ```text
//! { "param":   { "iterations": 8 },
//!   "data":    [ { "name": "frames", "size": 4096, "source": "directory",
//!                  "type": "buffer", "access": "read", "path": "input" } ],
//!   "program": [ { "name": "blur", "path": "kernels/blur.wgsl",
//!                  "dispatch": [64, 1, 1] } ] }
//! ```
//!
//! Loading is all-or-nothing: every item is validated, every problem is
//! collected, and only a fully valid description produces a [`JobSpec`].

mod loader;

pub use loader::{load_job, JobLoader, Loaded};

use std::path::{Path, PathBuf};

/// Where a data item's content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    /// One file, loaded or stored once per run
    File,
    /// One file per iteration, enumerated from (or generated into) a directory
    Directory,
    /// Device-resident scratch, never touches the disk
    Memory,
}

/// Direction of a file-backed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataAccess {
    /// Input to the kernel chain
    Read,
    /// Output of the kernel chain
    Write,
}

/// One buffer declared by the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub name: String,
    /// File or directory; `None` for memory items
    pub path: Option<PathBuf>,
    /// Bytes per buffer instance
    pub size: u64,
    pub source: DataSource,
    /// `None` for memory items
    pub access: Option<DataAccess>,
}

impl DataItem {
    /// Memory item (no path, no access)
    pub fn memory(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            path: None,
            size,
            source: DataSource::Memory,
            access: None,
        }
    }

    /// File or directory item
    pub fn backed(
        name: impl Into<String>,
        source: DataSource,
        access: DataAccess,
        path: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            size,
            source,
            access: Some(access),
        }
    }

    /// True if the item is paged through one file per iteration
    pub fn is_streaming(&self) -> bool {
        self.source == DataSource::Directory
    }
}

/// One kernel in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramItem {
    pub name: String,
    /// Kernel binary or source
    pub path: PathBuf,
    /// Thread-group extents
    pub dispatch: [u32; 3],
}

impl ProgramItem {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, dispatch: [u32; 3]) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dispatch,
        }
    }

    /// Total thread groups launched by one dispatch, saturating at `u64::MAX`
    pub fn total_groups(&self) -> u64 {
        self.dispatch
            .iter()
            .fold(1u64, |acc, &d| acc.saturating_mul(d as u64))
    }
}

/// Validated job description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Requested iteration count (before clamping to available inputs)
    pub iterations: usize,
    pub data: Vec<DataItem>,
    pub programs: Vec<ProgramItem>,
}

impl JobSpec {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            data: Vec::new(),
            programs: Vec::new(),
        }
    }

    /// Builder: append a data item
    pub fn with_data(mut self, item: DataItem) -> Self {
        self.data.push(item);
        self
    }

    /// Builder: append a program item
    pub fn with_program(mut self, program: ProgramItem) -> Self {
        self.programs.push(program);
        self
    }

    /// Parse and validate a JSON job description
    pub fn from_json_str(text: &str) -> crate::Result<Self> {
        JobLoader::new().load_str(text)
    }

    /// Rebase every relative path onto `dir`
    pub fn resolve_relative_to(mut self, dir: &Path) -> Self {
        for item in &mut self.data {
            if let Some(path) = item.path.as_mut() {
                if path.is_relative() {
                    *path = dir.join(&*path);
                }
            }
        }
        for program in &mut self.programs {
            if program.path.is_relative() {
                program.path = dir.join(&program.path);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_groups() {
        let program = ProgramItem::new("k", "k.wgsl", [100, 100, 100]);
        assert_eq!(program.total_groups(), 1_000_000);
    }

    #[test]
    fn test_total_groups_saturates() {
        let program = ProgramItem::new("k", "k.wgsl", [u32::MAX, u32::MAX, u32::MAX]);
        assert_eq!(program.total_groups(), u64::MAX);
    }

    #[test]
    fn test_resolve_relative_paths() {
        let job = JobSpec::new(1)
            .with_data(DataItem::backed("in", DataSource::Directory, DataAccess::Read, "frames", 16))
            .with_data(DataItem::backed("abs", DataSource::File, DataAccess::Read, "/tmp/x", 16))
            .with_data(DataItem::memory("scratch", 16))
            .with_program(ProgramItem::new("k", "kernels/k.wgsl", [1, 1, 1]))
            .resolve_relative_to(Path::new("/jobs"));

        assert_eq!(job.data[0].path, Some(PathBuf::from("/jobs/frames")));
        assert_eq!(job.data[1].path, Some(PathBuf::from("/tmp/x")));
        assert_eq!(job.data[2].path, None);
        assert_eq!(job.programs[0].path, PathBuf::from("/jobs/kernels/k.wgsl"));
    }

    #[test]
    fn test_streaming_classification() {
        assert!(DataItem::backed("d", DataSource::Directory, DataAccess::Write, "out", 4).is_streaming());
        assert!(!DataItem::backed("f", DataSource::File, DataAccess::Read, "in", 4).is_streaming());
        assert!(!DataItem::memory("m", 4).is_streaming());
    }
}
