//! Memory collector: `/proc/meminfo` and `/proc/vmstat`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::parser::{parse_meminfo, parse_vmstat};
use crate::collector::probe::read_string;
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading};

/// Derived memory figures, all in bytes except `percent`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySummary {
    pub total: i64,
    pub free: i64,
    pub available: i64,
    pub used: i64,
    pub buffers: i64,
    pub cached: i64,
    pub percent: f64,
    pub swap_total: i64,
    pub swap_free: i64,
}

impl MemorySummary {
    /// Applies the `free`-style derivations to parsed meminfo.
    pub fn from_meminfo(mem: &HashMap<String, i64>) -> Self {
        let get = |key: &str| mem.get(key).copied().unwrap_or(0);

        let total = get("MemTotal");
        let free = get("MemFree");
        let buffers = get("Buffers");
        let cached = get("Cached") + get("SReclaimable");
        let available = mem
            .get("MemAvailable")
            .copied()
            .unwrap_or(free + buffers + cached);
        let percent = if total > 0 {
            (total - available) as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total,
            free,
            available,
            used: total - free - buffers - cached,
            buffers,
            cached,
            percent,
            swap_total: get("SwapTotal"),
            swap_free: get("SwapFree"),
        }
    }
}

pub struct MemoryCollector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> MemoryCollector<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
        }
    }

    fn summary(&self) -> (Option<MemorySummary>, i64) {
        let (content, ts) = read_string(&self.fs, &self.proc_path.join("meminfo"));
        let mem = parse_meminfo(&content);
        if mem.is_empty() {
            return (None, ts);
        }
        (Some(MemorySummary::from_meminfo(&mem)), ts)
    }
}

impl<F: FileSystem> MetricCollector for MemoryCollector<F> {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(&mut self) -> Reading {
        let mut fields = Fields::new();

        let (summary, t_mem) = self.summary();
        if let Some(m) = summary {
            fields.put("vMemoryTotal", m.total, t_mem);
            fields.put("vMemoryFree", m.free, t_mem);
            fields.put("vMemoryAvailable", m.available, t_mem);
            fields.put("vMemoryUsed", m.used, t_mem);
            fields.put("vMemoryBuffers", m.buffers, t_mem);
            fields.put("vMemoryCached", m.cached, t_mem);
            fields.put("vMemoryPercent", m.percent, t_mem);
            fields.put("vMemorySwapTotal", m.swap_total, t_mem);
            fields.put("vMemorySwapFree", m.swap_free, t_mem);
            fields.put("vMemorySwapUsed", m.swap_total - m.swap_free, t_mem);
        }

        let (content, t_vm) = read_string(&self.fs, &self.proc_path.join("vmstat"));
        if !content.is_empty() {
            let faults = parse_vmstat(&content);
            fields.put("vMemoryPgFault", faults.pgfault, t_vm);
            fields.put("vMemoryMajorPageFault", faults.pgmajfault, t_vm);
        }

        Reading::Mapping(fields)
    }

    fn static_info(&mut self) -> Fields {
        let mut fields = Fields::new();
        if let (Some(m), _) = self.summary() {
            fields.put_plain("vMemoryTotalBytes", m.total);
            fields.put_plain("vSwapTotalBytes", m.swap_total);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::model::Value;

    #[test]
    fn test_collect_typical() {
        let mut c = MemoryCollector::new(MockFs::typical_system(), "/proc");
        let reading = c.collect();
        let f = reading.as_mapping().unwrap();

        let kb = 1024;
        assert_eq!(f.value_of("vMemoryTotal"), Some(&Value::Int(16_384_000 * kb)));
        assert_eq!(f.value_of("vMemoryAvailable"), Some(&Value::Int(12_000_000 * kb)));
        // Cached + SReclaimable
        assert_eq!(f.value_of("vMemoryCached"), Some(&Value::Int(2_304_000 * kb)));
        assert_eq!(
            f.value_of("vMemoryUsed"),
            Some(&Value::Int((16_384_000 - 8_192_000 - 512_000 - 2_304_000) * kb))
        );
        assert_eq!(f.value_of("vMemorySwapUsed"), Some(&Value::Int(1_024_000 * kb)));
        assert_eq!(f.value_of("vMemoryPgFault"), Some(&Value::Int(999_999)));
        assert_eq!(f.value_of("vMemoryMajorPageFault"), Some(&Value::Int(1_234)));

        let percent = f.value_of("vMemoryPercent").and_then(Value::as_f64).unwrap();
        let expected = (16_384_000.0 - 12_000_000.0) / 16_384_000.0 * 100.0;
        assert!((percent - expected).abs() < 1e-9);
    }

    #[test]
    fn test_available_fallback_without_memavailable() {
        let mem = parse_meminfo("MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 200 kB\n");
        let m = MemorySummary::from_meminfo(&mem);
        assert_eq!(m.available, 350 * 1024);
        assert_eq!(m.used, 650 * 1024);
    }

    #[test]
    fn test_zero_total_percent_is_zero() {
        let mem = parse_meminfo("MemTotal: 0 kB\nMemFree: 0 kB\n");
        let m = MemorySummary::from_meminfo(&mem);
        assert_eq!(m.percent, 0.0);
    }

    #[test]
    fn test_static_info() {
        let mut c = MemoryCollector::new(MockFs::typical_system(), "/proc");
        let info = c.static_info();
        assert_eq!(
            info.value_of("vMemoryTotalBytes"),
            Some(&Value::Int(16_384_000 * 1024))
        );
    }

    #[test]
    fn test_missing_files_give_empty_mapping() {
        let mut c = MemoryCollector::new(MockFs::new(), "/proc");
        assert!(c.collect().is_empty());
        assert!(c.static_info().is_empty());
    }
}
