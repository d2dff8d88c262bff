//! Seams between collectors and the outside world.
//!
//! `FileSystem` lets every `/proc` and `/sys` reader run against the real
//! kernel or against an in-memory `MockFs`. `MetricCollector` is the single
//! capability interface the `Registry` dispatches through.

use std::io;
use std::path::{Path, PathBuf};

use crate::model::{Fields, Reading};

/// Read-only filesystem access used by all collectors.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory (full paths, unordered).
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }
}

/// One subsystem collector.
///
/// Every method is total: failures degrade to empty or partial readings
/// and are only reported through logging.
pub trait MetricCollector: Send {
    /// Section name used as the key in a `Sample`.
    fn name(&self) -> &'static str;

    /// Collects one reading for the current tick.
    fn collect(&mut self) -> Reading;

    /// Facts that do not change during a session.
    fn static_info(&mut self) -> Fields {
        Fields::new()
    }

    /// Releases held resources. Must be safe to call more than once.
    fn cleanup(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_real_fs_reads_and_lists() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("loadavg"), "0.50 0.40 0.30 1/100 42\n").unwrap();

        let fs = RealFs::new();
        let content = fs.read_to_string(&dir.path().join("loadavg")).unwrap();
        assert!(content.starts_with("0.50"));

        let entries = fs.read_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_real_fs_exists() {
        let fs = RealFs::new();
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }
}
