//! Probe primitives.
//!
//! Each probe returns `(result, timestamp)` where the timestamp is taken
//! immediately *before* the underlying operation. A failed probe yields the
//! caller's default together with the attempt time; nothing here returns an
//! error or panics on missing or malformed input.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use chrono::Utc;
use tracing::trace;

use super::traits::FileSystem;

/// Jiffies per second assumed for `/proc` tick counters (USER_HZ).
pub const JIFFIES_PER_SECOND: i64 = 100;

/// Bytes per sector in `/proc/diskstats`.
pub const SECTOR_SIZE: i64 = 512;

/// Current wall-clock time as Unix nanoseconds.
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Runs a fallible operation, substituting `default` on error.
pub fn probe<T, E: Display>(default: T, op: impl FnOnce() -> Result<T, E>) -> (T, i64) {
    let ts = now_ns();
    match op() {
        Ok(v) => (v, ts),
        Err(e) => {
            trace!("probe failed: {}", e);
            (default, ts)
        }
    }
}

/// Reads a whole file; empty string on failure.
pub fn read_string<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> (String, i64) {
    probe(String::new(), || fs.read_to_string(path))
}

/// Reads a file holding a single integer; `0` on failure.
pub fn read_int<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> (i64, i64) {
    probe(0, || {
        fs.read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| s.trim().parse::<i64>().map_err(|e| e.to_string()))
    })
}

/// Reads a file as lines; empty vector on failure.
pub fn read_lines<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> (Vec<String>, i64) {
    let (content, ts) = read_string(fs, path);
    (content.lines().map(str::to_string).collect(), ts)
}

/// Parses a `key<sep>value` file into a map.
///
/// `sep = Some(':')` handles `/proc/meminfo` style files, `None` splits on
/// the first run of whitespace as in cgroup `cpu.stat`. Lines without a
/// separator are skipped; values are trimmed.
pub fn read_kv<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
    sep: Option<char>,
) -> (HashMap<String, String>, i64) {
    let (content, ts) = read_string(fs, path);
    (parse_kv(&content, sep), ts)
}

/// Pure part of [`read_kv`].
pub fn parse_kv(content: &str, sep: Option<char>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let split = match sep {
            Some(c) => line.split_once(c),
            None => line.trim().split_once(char::is_whitespace),
        };
        if let Some((key, value)) = split {
            let key = key.trim();
            if !key.is_empty() {
                map.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    #[test]
    fn test_missing_file_returns_default_and_timestamp() {
        let fs = MockFs::new();
        let before = now_ns();
        let (value, ts) = read_int(&fs, Path::new("/nope/cpuacct.usage"));
        assert_eq!(value, 0);
        assert!(ts >= before);

        let (text, ts) = read_string(&fs, Path::new("/nope"));
        assert!(text.is_empty());
        assert!(ts > 0);
    }

    #[test]
    fn test_read_int_malformed() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/fs/cgroup/memory.current", "not-a-number\n");
        let (value, _) = read_int(&fs, Path::new("/sys/fs/cgroup/memory.current"));
        assert_eq!(value, 0);

        fs.add_file("/sys/fs/cgroup/memory.peak", " 4096\n");
        let (value, _) = read_int(&fs, Path::new("/sys/fs/cgroup/memory.peak"));
        assert_eq!(value, 4096);
    }

    #[test]
    fn test_read_kv_separators() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal:  1024 kB\ngarbage\nMemFree: 512 kB\n");
        let (kv, _) = read_kv(&fs, Path::new("/proc/meminfo"), Some(':'));
        assert_eq!(kv.get("MemTotal").map(String::as_str), Some("1024 kB"));
        assert_eq!(kv.len(), 2);

        fs.add_file("/cg/cpu.stat", "usage_usec 100\nuser_usec  60\n");
        let (kv, _) = read_kv(&fs, Path::new("/cg/cpu.stat"), None);
        assert_eq!(kv.get("user_usec").map(String::as_str), Some("60"));
    }

    #[test]
    fn test_read_lines() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/fs/cgroup/cpuacct/tasks", "1\n27\n43\n");
        let (lines, ts) = read_lines(&fs, Path::new("/sys/fs/cgroup/cpuacct/tasks"));
        assert_eq!(lines, vec!["1", "27", "43"]);
        assert!(ts > 0);

        let (lines, ts) = read_lines(&fs, Path::new("/sys/fs/cgroup/pids/tasks"));
        assert!(lines.is_empty());
        assert!(ts > 0);
    }

    #[test]
    fn test_probe_error_uses_default() {
        let (v, ts) = probe(7u32, || Err::<u32, _>("unsupported"));
        assert_eq!(v, 7);
        assert!(ts > 0);

        let (v, _) = probe(0u32, || Ok::<_, String>(3));
        assert_eq!(v, 3);
    }
}
