//! Directory enumeration

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// Lazy, one-shot directory scan
///
/// Entries whose metadata can't be read or whose names aren't UTF-8 are
/// skipped with a warning.
pub struct DirScan {
    dir: PathBuf,
    inner: ReadDir,
}

impl Iterator for DirScan {
    type Item = DirEntryInfo;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.inner.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!("Skipping non UTF-8 file name {:?} in {}", raw, self.dir.display());
                    continue;
                }
            };
            match entry.metadata() {
                Ok(meta) => {
                    return Some(DirEntryInfo {
                        name,
                        is_directory: meta.is_dir(),
                        size: meta.len(),
                    })
                }
                Err(e) => tracing::warn!("Skipping {}: {}", name, e),
            }
        }
        None
    }
}

/// Start scanning `dir`
pub fn scan_directory<P: AsRef<Path>>(dir: P) -> Result<DirScan> {
    let dir = dir.as_ref().to_path_buf();
    let inner = std::fs::read_dir(&dir).map_err(|source| PipelineError::Io {
        path: dir.clone(),
        source,
    })?;
    Ok(DirScan { dir, inner })
}

/// Regular files of `dir` as `dir/name`, sorted lexicographically by name
pub fn sorted_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut names: Vec<String> = scan_directory(dir)?
        .filter(|entry| !entry.is_directory)
        .map(|entry| entry.name)
        .collect();
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_reports_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.dat"), [0u8; 10]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let mut entries: Vec<DirEntryInfo> = scan_directory(dir.path()).unwrap().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.dat");
        assert_eq!(entries[0].size, 10);
        assert!(!entries[0].is_directory);
        assert!(entries[1].is_directory);
    }

    #[test]
    fn test_sorted_files_is_deterministic() {
        let dir = TempDir::new().unwrap();
        for name in ["c.bin", "a.bin", "b.bin", "a10.bin", "a2.bin"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("skip")).unwrap();

        let first = sorted_files(dir.path()).unwrap();
        let second = sorted_files(dir.path()).unwrap();

        let names: Vec<String> = first
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.bin", "a10.bin", "a2.bin", "b.bin", "c.bin"]);
        assert_eq!(first, second);
        assert!(first.iter().all(|p| p.starts_with(dir.path())));
    }

    #[test]
    fn test_scan_missing_directory() {
        assert!(matches!(
            scan_directory("/no/such/dir/anywhere"),
            Err(PipelineError::Io { .. })
        ));
    }
}
