//! Parsers for `/proc` and `/sys` files.
//!
//! These are pure functions over file contents so each format can be tested
//! with string literals. Malformed lines are skipped, never fatal.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Whole physical block devices; partitions, loop, ram and dm devices do not match.
static PHYSICAL_DISK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(sd[a-z]+|hd[a-z]+|vd[a-z]+|xvd[a-z]+|nvme\d+n\d+|mmcblk\d+)$")
        .expect("static regex")
});

static VMSTAT_FAULTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(pgfault|pgmajfault)\s+(\d+)").expect("static regex"));

/// Returns `true` for device names counted by the disk collector.
pub fn is_physical_disk(name: &str) -> bool {
    PHYSICAL_DISK.is_match(name)
}

// ============ /proc/stat ============

/// Aggregate `cpu` line of `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTimes {
    pub user: i64,
    pub nice: i64,
    pub system: i64,
    pub idle: i64,
    pub iowait: i64,
    pub irq: i64,
    pub softirq: i64,
    pub steal: i64,
}

/// Counters from `/proc/stat` used by the CPU collector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStat {
    pub cpu: CpuTimes,
    pub ctxt: i64,
    pub btime: i64,
}

/// Parses `/proc/stat`. Missing trailing columns (older kernels) read as 0.
pub fn parse_global_stat(content: &str) -> Result<GlobalStat, ParseError> {
    let mut stat = GlobalStat::default();
    let mut seen_cpu = false;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&key) = parts.first() else {
            continue;
        };
        let get_val =
            |idx: usize| -> i64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        match key {
            "cpu" => {
                seen_cpu = true;
                stat.cpu = CpuTimes {
                    user: get_val(1),
                    nice: get_val(2),
                    system: get_val(3),
                    idle: get_val(4),
                    iowait: get_val(5),
                    irq: get_val(6),
                    softirq: get_val(7),
                    steal: get_val(8),
                };
            }
            "ctxt" => stat.ctxt = get_val(1),
            "btime" => stat.btime = get_val(1),
            _ => {}
        }
    }

    if !seen_cpu {
        return Err(ParseError::new("missing aggregate cpu line"));
    }
    Ok(stat)
}

/// Parses the 1-minute load average from `/proc/loadavg`.
pub fn parse_loadavg(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty loadavg"))?
        .parse()
        .map_err(|_| ParseError::new("invalid load1"))
}

// ============ memory ============

/// Parses `/proc/meminfo` into bytes (`kB` values multiplied by 1024).
pub fn parse_meminfo(content: &str) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        let Some(value) = tokens.next().and_then(|v| v.parse::<i64>().ok()) else {
            continue;
        };
        let bytes = match tokens.next() {
            Some("kB") => value * 1024,
            _ => value,
        };
        map.insert(key.trim().to_string(), bytes);
    }
    map
}

/// Page fault counters from `/proc/vmstat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageFaults {
    pub pgfault: i64,
    pub pgmajfault: i64,
}

pub fn parse_vmstat(content: &str) -> PageFaults {
    let mut faults = PageFaults::default();
    for caps in VMSTAT_FAULTS.captures_iter(content) {
        let value = caps[2].parse().unwrap_or(0);
        match &caps[1] {
            "pgfault" => faults.pgfault = value,
            _ => faults.pgmajfault = value,
        }
    }
    faults
}

// ============ /proc/diskstats ============

/// The eleven counters following the device name in `/proc/diskstats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats {
    pub device: String,
    pub reads: i64,
    pub reads_merged: i64,
    pub sectors_read: i64,
    pub read_time_ms: i64,
    pub writes: i64,
    pub writes_merged: i64,
    pub sectors_written: i64,
    pub write_time_ms: i64,
    pub io_in_progress: i64,
    pub io_time_ms: i64,
    pub weighted_io_time_ms: i64,
}

/// Parses `/proc/diskstats` (all devices, unfiltered).
///
/// Format: `major minor name reads reads_merged sectors_read read_ms writes ...`
pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }

        let get_val =
            |idx: usize| -> i64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        disks.push(DiskStats {
            device: parts[2].to_string(),
            reads: get_val(3),
            reads_merged: get_val(4),
            sectors_read: get_val(5),
            read_time_ms: get_val(6),
            writes: get_val(7),
            writes_merged: get_val(8),
            sectors_written: get_val(9),
            write_time_ms: get_val(10),
            io_in_progress: get_val(11),
            io_time_ms: get_val(12),
            weighted_io_time_ms: get_val(13),
        });
    }

    disks
}

// ============ /proc/net/dev ============

/// Per-interface counters from `/proc/net/dev`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDevStats {
    pub interface: String,
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub rx_errs: i64,
    pub rx_drop: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
    pub tx_errs: i64,
    pub tx_drop: i64,
}

/// Parses `/proc/net/dev`, skipping the two header lines.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
pub fn parse_net_dev(content: &str) -> Vec<NetDevStats> {
    let mut devices = Vec::new();

    for line in content.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = counters.split_whitespace().collect();
        if values.len() < 16 {
            continue;
        }

        let get_val =
            |idx: usize| -> i64 { values.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        devices.push(NetDevStats {
            interface: name.trim().to_string(),
            rx_bytes: get_val(0),
            rx_packets: get_val(1),
            rx_errs: get_val(2),
            rx_drop: get_val(3),
            tx_bytes: get_val(8),
            tx_packets: get_val(9),
            tx_errs: get_val(10),
            tx_drop: get_val(11),
        });
    }

    devices
}

// ============ /proc/cpuinfo and /sys cpu ============

/// First `model name` entry of `/proc/cpuinfo`.
pub fn parse_cpu_model(content: &str) -> Option<String> {
    cpuinfo_field(content, "model name").map(str::to_string)
}

/// First `cpu MHz` entry of `/proc/cpuinfo`.
pub fn parse_cpuinfo_mhz(content: &str) -> Option<f64> {
    cpuinfo_field(content, "cpu MHz").and_then(|v| v.parse().ok())
}

/// Number of `processor` stanzas in `/proc/cpuinfo`.
pub fn count_processors(content: &str) -> usize {
    content
        .lines()
        .filter(|l| l.split(':').next().map(str::trim) == Some("processor"))
        .count()
}

fn cpuinfo_field<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == name).then(|| value.trim())
    })
}

/// Parses a sysfs cache size such as `32K` or `32M` into bytes.
pub fn parse_cache_size(content: &str) -> Option<i64> {
    let s = content.trim();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else {
        (s, 1)
    };
    digits.trim().parse::<i64>().ok().map(|n| n * multiplier)
}

// ============ /proc/[pid] ============

/// Fields of `/proc/[pid]/stat` used by the process collector (jiffies).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: i64,
    pub comm: String,
    pub utime: i64,
    pub stime: i64,
    pub cutime: i64,
    pub cstime: i64,
    pub num_threads: i64,
    pub vsize: i64,
    pub delayacct_blkio_ticks: i64,
}

/// Parses `/proc/[pid]/stat`.
///
/// The comm field can contain spaces and parentheses, so fields are counted
/// from the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();
    let open = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close < open {
        return Err(ParseError::new("unbalanced comm in stat"));
    }

    let pid = content[..open]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 21 {
        return Err(ParseError::new("truncated stat"));
    }

    let get_val = |idx: usize| -> i64 { rest.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

    Ok(ProcStat {
        pid,
        comm: content[open + 1..close].to_string(),
        utime: get_val(11),
        stime: get_val(12),
        cutime: get_val(13),
        cstime: get_val(14),
        num_threads: get_val(17),
        vsize: get_val(20),
        delayacct_blkio_ticks: get_val(39),
    })
}

/// Resident pages (second column) of `/proc/[pid]/statm`.
pub fn parse_statm_resident(content: &str) -> Option<i64> {
    content.split_whitespace().nth(1)?.parse().ok()
}
