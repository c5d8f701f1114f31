//! I/O workload descriptors

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::io::IoOp;
use crate::memory::{AccessClass, BufferBinding};

/// How often a workload touches its files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// One file, read at warm-up or written at cool-down
    Unique,
    /// One file per iteration, double-buffered
    Streaming,
}

/// File traffic of one data item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoWorkload {
    /// Data item name
    pub name: String,
    pub kind: WorkloadKind,
    /// `Read` fills staging from files, `Write` drains staging to files
    pub op: IoOp,
    /// Staging class: `CpuWrite` for reads, `CpuRead` for writes
    pub class: AccessClass,
    /// Bytes per file
    pub size: u64,
    /// Files in iteration order (exactly one for unique workloads)
    pub files: FileList,
    /// Staging buffer per generation (the same binding twice for unique workloads)
    pub staging: [BufferBinding; 2],
}

impl IoWorkload {
    /// Byte offset of the staging buffer per generation
    pub fn offsets(&self) -> [u64; 2] {
        [self.staging[0].offset, self.staging[1].offset]
    }

    pub fn file(&self, index: usize) -> Option<Cow<'_, Path>> {
        self.files.get(index)
    }

    pub fn is_read(&self) -> bool {
        self.op == IoOp::Read
    }
}

/// Expand an output pattern such as `output{:04}.dat` for `index`
///
/// `{}` inserts the plain index, `{:0N}` pads it with zeros to `N` digits.
/// A pattern without a placeholder gets the index appended.
pub fn format_output_name(pattern: &str, index: usize) -> String {
    let Some(start) = pattern.find('{') else {
        return format!("{}{}", pattern, index);
    };
    let Some(len) = pattern[start..].find('}') else {
        return format!("{}{}", pattern, index);
    };

    let spec = &pattern[start + 1..start + len];
    let width = spec
        .strip_prefix(":0")
        .and_then(|w| w.parse::<usize>().ok())
        .unwrap_or(0);

    format!(
        "{}{:0width$}{}",
        &pattern[..start],
        index,
        &pattern[start + len + 1..],
        width = width
    )
}

/// Files a workload walks through, one per iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileList {
    /// Sorted directory scan, or the single file of a unique workload
    Listed(Vec<PathBuf>),
    /// `dir/<pattern(i)>` for `i < count`, named on demand
    Generated { dir: PathBuf, pattern: String, count: usize },
}

impl FileList {
    /// Output names for a streaming-write item
    pub fn generated(dir: impl Into<PathBuf>, pattern: impl Into<String>, count: usize) -> Self {
        FileList::Generated {
            dir: dir.into(),
            pattern: pattern.into(),
            count,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FileList::Listed(files) => files.len(),
            FileList::Generated { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Cow<'_, Path>> {
        match self {
            FileList::Listed(files) => files.get(index).map(|p| Cow::Borrowed(p.as_path())),
            FileList::Generated { dir, pattern, count } => {
                (index < *count).then(|| Cow::Owned(dir.join(format_output_name(pattern, index))))
            }
        }
    }
}

impl From<Vec<PathBuf>> for FileList {
    fn from(files: Vec<PathBuf>) -> Self {
        FileList::Listed(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_output_name() {
        assert_eq!(format_output_name("output{:04}.dat", 7), "output0007.dat");
        assert_eq!(format_output_name("output{:04}.dat", 12345), "output12345.dat");
        assert_eq!(format_output_name("frame_{}.bin", 3), "frame_3.bin");
        assert_eq!(format_output_name("raw", 5), "raw5");
    }

    #[test]
    fn test_generated_files_sorted() {
        let files = FileList::generated("/out", "output{:04}.dat", 3);
        let names: Vec<PathBuf> = (0..files.len()).filter_map(|i| files.get(i)).map(Cow::into_owned).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("/out/output0000.dat"),
                PathBuf::from("/out/output0001.dat"),
                PathBuf::from("/out/output0002.dat"),
            ]
        );
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
        assert_eq!(files.get(3), None);
    }

    #[test]
    fn test_generated_files_are_lazy() {
        let files = FileList::generated("/out", "output{:04}.dat", usize::MAX);
        assert_eq!(files.len(), usize::MAX);
        assert_eq!(files.get(12).as_deref(), Some(Path::new("/out/output0012.dat")));
    }

    #[test]
    fn test_listed_files() {
        let files = FileList::from(vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
        assert_eq!(files.len(), 2);
        assert_eq!(files.get(1).as_deref(), Some(Path::new("b.bin")));
        assert!(files.get(2).is_none());
        assert!(FileList::Listed(Vec::new()).is_empty());
    }
}
