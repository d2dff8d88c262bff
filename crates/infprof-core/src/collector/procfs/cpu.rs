//! CPU collector: `/proc/stat`, `/proc/loadavg` and cpufreq.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::host::{self, ClockSync};
use super::parser::{
    count_processors, parse_cache_size, parse_cpu_model, parse_cpuinfo_mhz, parse_global_stat,
    parse_loadavg,
};
use crate::collector::probe::{JIFFIES_PER_SECOND, now_ns, read_int, read_string};
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading};

/// Host CPU counters. Jiffies are reported in centiseconds.
pub struct CpuCollector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    sys_path: PathBuf,
    clock: fn() -> Option<ClockSync>,
}

impl<F: FileSystem> CpuCollector<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>, sys_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
            sys_path: sys_path.as_ref().to_path_buf(),
            clock: host::kernel_clock_sync,
        }
    }

    /// Replaces the kernel clock query used for the `vTime*` static fields.
    pub fn with_clock_source(mut self, clock: fn() -> Option<ClockSync>) -> Self {
        self.clock = clock;
        self
    }

    fn cpu_dirs(&self) -> Vec<PathBuf> {
        let root = self.sys_path.join("devices/system/cpu");
        let mut dirs: Vec<PathBuf> = self
            .fs
            .read_dir(&root)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("cpu"))
                    .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
            })
            .collect();
        dirs.sort();
        dirs
    }

    /// Average of per-core `scaling_cur_freq` (kHz) in MHz, falling back to
    /// the first `cpu MHz` of `/proc/cpuinfo`.
    fn frequency_mhz(&self) -> (f64, i64) {
        let ts = now_ns();
        let freqs: Vec<i64> = self
            .cpu_dirs()
            .iter()
            .map(|dir| read_int(&self.fs, &dir.join("cpufreq/scaling_cur_freq")).0)
            .filter(|&khz| khz > 0)
            .collect();

        if !freqs.is_empty() {
            let avg_khz = freqs.iter().sum::<i64>() as f64 / freqs.len() as f64;
            return (avg_khz / 1000.0, ts);
        }

        let (cpuinfo, _) = read_string(&self.fs, &self.proc_path.join("cpuinfo"));
        (parse_cpuinfo_mhz(&cpuinfo).unwrap_or(0.0), ts)
    }

    /// Cache sizes per level, counting a cache shared by several cores once.
    fn cache_sizes(&self) -> BTreeMap<String, i64> {
        let mut by_level: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();

        for cpu in self.cpu_dirs() {
            let Ok(indexes) = self.fs.read_dir(&cpu.join("cache")) else {
                continue;
            };
            for index in indexes {
                let is_index = index
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("index"));
                if !is_index {
                    continue;
                }

                let read = |name: &str| read_string(&self.fs, &index.join(name)).0.trim().to_string();
                let level = read("level");
                let Some(size) = parse_cache_size(&read("size")) else {
                    continue;
                };
                if level.is_empty() {
                    continue;
                }
                let suffix = match read("type").as_str() {
                    "Data" => "d",
                    "Instruction" => "i",
                    _ => "",
                };

                by_level
                    .entry(format!("L{}{}", level, suffix))
                    .or_default()
                    .entry(read("shared_cpu_map"))
                    .or_insert(size);
            }
        }

        by_level
            .into_iter()
            .map(|(key, instances)| (key, instances.values().sum()))
            .collect()
    }
}

impl<F: FileSystem> MetricCollector for CpuCollector<F> {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&mut self) -> Reading {
        let mut fields = Fields::new();

        let (content, t_stat) = read_string(&self.fs, &self.proc_path.join("stat"));
        match parse_global_stat(&content) {
            Ok(stat) => {
                let cpu = &stat.cpu;
                let counters = [
                    ("vCpuTimeUserMode", cpu.user),
                    ("vCpuTimeKernelMode", cpu.system),
                    ("vCpuIdleTime", cpu.idle),
                    ("vCpuTimeIOWait", cpu.iowait),
                    ("vCpuTimeIntSrvc", cpu.irq),
                    ("vCpuTimeSoftIntSrvc", cpu.softirq),
                    ("vCpuNice", cpu.nice),
                    ("vCpuSteal", cpu.steal),
                    ("vCpuTime", cpu.user + cpu.system),
                ];
                for (name, jiffies) in counters {
                    fields.put(name, jiffies * JIFFIES_PER_SECOND, t_stat);
                }
                fields.put("vCpuContextSwitches", stat.ctxt, t_stat);
            }
            Err(e) => debug!("cpu: /proc/stat unusable: {}", e),
        }

        let (content, t_load) = read_string(&self.fs, &self.proc_path.join("loadavg"));
        if let Ok(load) = parse_loadavg(&content) {
            fields.put("vLoadAvg", load, t_load);
        }

        let (mhz, t_freq) = self.frequency_mhz();
        fields.put("vCpuMhz", mhz, t_freq);

        Reading::Mapping(fields)
    }

    fn static_info(&mut self) -> Fields {
        let mut fields = Fields::new();
        let (cpuinfo, _) = read_string(&self.fs, &self.proc_path.join("cpuinfo"));

        let processors = match count_processors(&cpuinfo) {
            0 => std::thread::available_parallelism().map_or(0, |n| n.get()),
            n => n,
        };
        fields.put_plain("vNumProcessors", processors);
        fields.put_plain(
            "vCpuType",
            parse_cpu_model(&cpuinfo).unwrap_or_else(|| "unknown".to_string()),
        );

        let caches = self
            .cache_sizes()
            .into_iter()
            .map(|(level, bytes)| (level, Reading::plain(bytes)))
            .collect();
        fields.insert("vCpuCache".to_string(), Reading::Mapping(caches));

        fields.put_plain("vKernelInfo", host::kernel_info(&self.fs, &self.proc_path));
        fields.put_plain("vBootTime", host::boot_time(&self.fs, &self.proc_path));

        if let Some(clock) = (self.clock)() {
            fields.put_plain("vTimeSynced", i64::from(clock.synced));
            fields.put_plain("vTimeOffsetSeconds", clock.offset_seconds);
            fields.put_plain("vTimeMaxErrorSeconds", clock.max_error_seconds);
        } else {
            debug!("cpu: kernel clock state unavailable");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::model::Value;

    fn collector(fs: MockFs) -> CpuCollector<MockFs> {
        CpuCollector::new(fs, "/proc", "/sys").with_clock_source(|| {
            Some(ClockSync {
                synced: true,
                offset_seconds: -0.000_25,
                max_error_seconds: 0.016,
            })
        })
    }

    fn fields(reading: Reading) -> Fields {
        reading.as_mapping().cloned().unwrap()
    }

    #[test]
    fn test_collect_converts_jiffies() {
        let mut c = collector(MockFs::typical_system());
        let f = fields(c.collect());

        assert_eq!(f.value_of("vCpuTimeUserMode"), Some(&Value::Int(1_000_000)));
        assert_eq!(f.value_of("vCpuTimeKernelMode"), Some(&Value::Int(300_000)));
        assert_eq!(f.value_of("vCpuSteal"), Some(&Value::Int(5_000)));
        assert_eq!(f.value_of("vCpuTime"), Some(&Value::Int(1_300_000)));
        assert_eq!(f.value_of("vCpuContextSwitches"), Some(&Value::Int(500_000)));
        assert_eq!(f.value_of("vLoadAvg"), Some(&Value::Float(0.15)));
    }

    #[test]
    fn test_every_field_has_read_timestamp() {
        let mut c = collector(MockFs::typical_system());
        for (name, reading) in fields(c.collect()) {
            match reading {
                Reading::Scalar { time, .. } => assert!(time.is_some(), "{}", name),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_frequency_from_sysfs_average() {
        let mut c = collector(MockFs::typical_system());
        let f = fields(c.collect());
        assert_eq!(f.value_of("vCpuMhz"), Some(&Value::Float(2500.0)));
    }

    #[test]
    fn test_frequency_falls_back_to_cpuinfo() {
        let mut fs = MockFs::typical_system();
        fs.remove_file("/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq");
        fs.remove_file("/sys/devices/system/cpu/cpu1/cpufreq/scaling_cur_freq");
        let mut c = collector(fs);
        let f = fields(c.collect());
        assert_eq!(f.value_of("vCpuMhz"), Some(&Value::Float(2200.0)));
    }

    #[test]
    fn test_missing_proc_yields_partial_fields() {
        let mut c = collector(MockFs::new());
        let f = fields(c.collect());
        assert!(f.value_of("vCpuTime").is_none());
        assert_eq!(f.value_of("vCpuMhz"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_static_info_dedupes_shared_caches() {
        let mut c = collector(MockFs::typical_system());
        let info = c.static_info();

        assert_eq!(info.value_of("vNumProcessors"), Some(&Value::Int(2)));
        assert_eq!(
            info.value_of("vCpuType"),
            Some(&Value::from("Intel(R) Xeon(R) CPU @ 2.20GHz"))
        );

        let cache = info["vCpuCache"].as_mapping().unwrap();
        assert_eq!(cache.value_of("L1d"), Some(&Value::Int(2 * 32 * 1024)));
        assert_eq!(cache.value_of("L1i"), Some(&Value::Int(2 * 32 * 1024)));
        assert_eq!(cache.value_of("L2"), Some(&Value::Int(2 * 1024 * 1024)));
        // L3 is shared by both cores (same shared_cpu_map)
        assert_eq!(cache.value_of("L3"), Some(&Value::Int(32 * 1024 * 1024)));
        assert_eq!(info.value_of("vBootTime"), Some(&Value::Int(1700000000)));
    }

    #[test]
    fn test_static_info_reports_clock_sync() {
        let info = collector(MockFs::typical_system()).static_info();
        assert_eq!(info.value_of("vTimeSynced"), Some(&Value::Int(1)));
        assert_eq!(info.value_of("vTimeOffsetSeconds"), Some(&Value::Float(-0.000_25)));
        assert_eq!(info.value_of("vTimeMaxErrorSeconds"), Some(&Value::Float(0.016)));

        let mut unknown = CpuCollector::new(MockFs::typical_system(), "/proc", "/sys")
            .with_clock_source(|| None);
        assert!(unknown.static_info().value_of("vTimeSynced").is_none());
    }
}
