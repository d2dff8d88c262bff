//! Parsers for cgroup v1 and v2 accounting files.

/// Accounting layout of the mounted cgroup hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

impl CgroupVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CgroupVersion::V1 => "v1",
            CgroupVersion::V2 => "v2",
        }
    }
}

/// Relevant counters of v2 `cpu.stat`, in microseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStatV2 {
    pub usage_usec: i64,
    pub user_usec: i64,
    pub system_usec: i64,
}

/// Parses v2 `cpu.stat`.
/// Format: key value pairs, one per line
pub fn parse_cpu_stat(content: &str) -> CpuStatV2 {
    let mut stat = CpuStatV2::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let value: i64 = parts[1].parse().unwrap_or(0);
        match parts[0] {
            "usage_usec" => stat.usage_usec = value,
            "user_usec" => stat.user_usec = value,
            "system_usec" => stat.system_usec = value,
            _ => {}
        }
    }

    stat
}

/// Sums `rbytes=` and `wbytes=` over all devices of v2 `io.stat`.
/// Format: "8:0 rbytes=1234 wbytes=5678 rios=10 wios=20 dbytes=0 dios=0"
pub fn parse_io_stat(content: &str) -> (i64, i64) {
    let mut read = 0;
    let mut write = 0;

    for line in content.lines() {
        for token in line.split_whitespace().skip(1) {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let value: i64 = value.parse().unwrap_or(0);
            match key {
                "rbytes" => read += value,
                "wbytes" => write += value,
                _ => {}
            }
        }
    }

    (read, write)
}

/// Parses v1 `cpuacct.stat` into `(user, system)` jiffies.
pub fn parse_cpuacct_stat(content: &str) -> (i64, i64) {
    let mut user = 0;
    let mut system = 0;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let value = value.parse().unwrap_or(0);
        match key {
            "user" => user = value,
            "system" => system = value,
            _ => {}
        }
    }
    (user, system)
}

/// Parses v1 `cpuacct.usage_percpu`: one nanosecond counter per CPU.
pub fn parse_usage_percpu(content: &str) -> Vec<i64> {
    content
        .split_whitespace()
        .map(|v| v.parse().unwrap_or(0))
        .collect()
}

/// Sums `Read` and `Write` rows of v1 `blkio.throttle.io_service_bytes`.
/// Format: "8:0 Read 4096", with a trailing "Total N" line.
pub fn parse_blkio_service_bytes(content: &str) -> (i64, i64) {
    let mut read = 0;
    let mut write = 0;
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            continue;
        }
        let value: i64 = parts[2].parse().unwrap_or(0);
        match parts[1].to_ascii_lowercase().as_str() {
            "read" => read += value,
            "write" => write += value,
            _ => {}
        }
    }
    (read, write)
}

/// Sums v1 `blkio.sectors` over devices.
/// Format: "8:0 1234", one device per line
pub fn parse_blkio_sectors(content: &str) -> i64 {
    content
        .lines()
        .filter_map(|line| {
            let (device, value) = line.trim().split_once(char::is_whitespace)?;
            if !device.contains(':') {
                return None;
            }
            value.trim().parse::<i64>().ok()
        })
        .sum()
}
