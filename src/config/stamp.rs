//! File stamps used to detect external modification of a document.

use std::path::Path;
use std::time::SystemTime;

/// Snapshot of a file's identity on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: SystemTime,
    pub len: u64,
}

/// Source of file stamps. Injected so tests can simulate other writers.
pub trait StatSource: Send + Sync {
    /// Stamp of `path`, or `None` if it does not exist.
    fn stamp(&self, path: &Path) -> Option<FileStamp>;
}

/// Reads stamps from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStat;

impl StatSource for DiskStat {
    fn stamp(&self, path: &Path) -> Option<FileStamp> {
        let meta = std::fs::metadata(path).ok()?;
        Some(FileStamp {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disk_stamp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.yml");
        assert!(DiskStat.stamp(&path).is_none());

        std::fs::write(&path, "a: 1\n").unwrap();
        let first = DiskStat.stamp(&path).unwrap();
        assert_eq!(first.len, 5);
        assert_eq!(DiskStat.stamp(&path), Some(first));

        std::fs::write(&path, "a: 100\n").unwrap();
        assert_ne!(DiskStat.stamp(&path), Some(first));
    }
}
