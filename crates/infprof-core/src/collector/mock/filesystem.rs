//! In-memory filesystem for exercising collectors without a Linux host.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::collector::traits::FileSystem;

/// In-memory filesystem for testing.
///
/// Files and directories live in maps; adding a file registers every parent
/// directory so `read_dir` and `exists` behave like the real tree.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content, creating parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Removes a file if present.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Adds the `/proc/<pid>` files read by the process and GPU collectors.
    pub fn add_pid(&mut self, pid: u32, stat: &str, status: &str, statm: &str, cmdline: &str) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        self.add_file(base.join("statm"), statm);
        self.add_file(base.join("cmdline"), cmdline);
        if let Some(name) = status
            .lines()
            .find_map(|l| l.strip_prefix("Name:"))
            .map(str::trim)
        {
            self.add_file(base.join("comm"), format!("{}\n", name));
        }
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let children = self
            .files
            .keys()
            .chain(self.directories.iter())
            .filter(|p| p.parent() == Some(path) && p.as_path() != path)
            .cloned()
            .collect::<HashSet<_>>();

        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/fs/cgroup/memory.current", "4096\n");

        assert!(fs.exists(Path::new("/sys/fs/cgroup")));
        assert!(fs.exists(Path::new("/sys")));
        assert_eq!(
            fs.read_to_string(Path::new("/sys/fs/cgroup/memory.current"))
                .unwrap(),
            "4096\n"
        );
    }

    #[test]
    fn test_read_dir_lists_direct_children_only() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/class/net/eth0/mtu", "1500");
        fs.add_file("/sys/class/net/lo/mtu", "65536");
        fs.add_dir("/sys/class/net/docker0");

        let mut entries = fs.read_dir(Path::new("/sys/class/net")).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/sys/class/net/docker0"),
                PathBuf::from("/sys/class/net/eth0"),
                PathBuf::from("/sys/class/net/lo"),
            ]
        );
    }

    #[test]
    fn test_add_pid_derives_comm() {
        let mut fs = MockFs::new();
        fs.add_pid(77, "77 (python3) S", "Name:\tpython3\n", "10 5", "python3\0serve\0");
        assert_eq!(
            fs.read_to_string(Path::new("/proc/77/comm")).unwrap(),
            "python3\n"
        );
    }

    #[test]
    fn test_not_found() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/nonexistent")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(fs.read_dir(Path::new("/nonexistent")).is_err());
    }
}
