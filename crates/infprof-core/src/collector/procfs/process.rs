//! Per-process collector over `/proc/[pid]`.
//!
//! Off by default: on a busy host it adds a column group per process.

use std::path::{Path, PathBuf};

use super::parser::{parse_proc_stat, parse_statm_resident};
use crate::collector::probe::{JIFFIES_PER_SECOND, read_kv, read_string};
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading};

/// Page size used to turn `statm` pages into bytes.
pub const PAGE_SIZE: i64 = 4096;

pub struct ProcessCollector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> ProcessCollector<F> {
    pub fn new(fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
        }
    }

    fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .fs
            .read_dir(&self.proc_path)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Reads one process; `None` if it exited or its stat is unreadable.
    fn collect_pid(&self, pid: u32) -> Option<Fields> {
        let dir = self.proc_path.join(pid.to_string());

        let (stat_raw, t_stat) = read_string(&self.fs, &dir.join("stat"));
        let stat = parse_proc_stat(&stat_raw).ok()?;
        let (status, t_status) = read_kv(&self.fs, &dir.join("status"), Some(':'));
        let (cmdline, _) = read_string(&self.fs, &dir.join("cmdline"));
        let (statm, t_statm) = read_string(&self.fs, &dir.join("statm"));

        let name = status
            .get("Name")
            .filter(|n| !n.is_empty())
            .cloned()
            .unwrap_or_else(|| stat.comm.clone());
        let status_int = |key: &str| -> i64 {
            status
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };

        let mut f = Fields::new();
        f.put("pId", stat.pid, t_stat);
        f.put("pName", name, t_stat);
        f.put(
            "pCmdline",
            cmdline.trim_end_matches('\0').replace('\0', " "),
            t_stat,
        );
        f.put("pNumThreads", stat.num_threads, t_stat);
        f.put("pCpuTimeUserMode", stat.utime * JIFFIES_PER_SECOND, t_stat);
        f.put("pCpuTimeKernelMode", stat.stime * JIFFIES_PER_SECOND, t_stat);
        f.put("pChildrenUserMode", stat.cutime * JIFFIES_PER_SECOND, t_stat);
        f.put("pChildrenKernelMode", stat.cstime * JIFFIES_PER_SECOND, t_stat);
        f.put(
            "pVoluntaryContextSwitches",
            status_int("voluntary_ctxt_switches"),
            t_status,
        );
        f.put(
            "pNonvoluntaryContextSwitches",
            status_int("nonvoluntary_ctxt_switches"),
            t_status,
        );
        f.put(
            "pBlockIODelays",
            stat.delayacct_blkio_ticks * JIFFIES_PER_SECOND,
            t_stat,
        );
        f.put("pVirtualMemoryBytes", stat.vsize, t_stat);
        f.put(
            "pResidentSetSize",
            parse_statm_resident(&statm).unwrap_or(0) * PAGE_SIZE,
            t_statm,
        );
        Some(f)
    }
}

impl<F: FileSystem> MetricCollector for ProcessCollector<F> {
    fn name(&self) -> &'static str {
        "processes"
    }

    fn collect(&mut self) -> Reading {
        Reading::Sequence(
            self.pids()
                .into_iter()
                .filter_map(|pid| self.collect_pid(pid))
                .map(Reading::Mapping)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use crate::model::Value;

    const STAT: &str = "4242 (python3) S 1 4242 4242 0 -1 4194304 100 0 0 0 30 7 0 0 20 0 12 0 12345 2147483648 100 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 2 0 0";

    #[test]
    fn test_collects_process_fields() {
        let mut fs = MockFs::typical_system();
        fs.add_pid(
            4242,
            STAT,
            "Name:\tpython3\nvoluntary_ctxt_switches:\t15\nnonvoluntary_ctxt_switches:\t3\n",
            "524288 2048 100 1 0 300 0\n",
            "python3\0-m\0vllm.entrypoints.openai.api_server\0",
        );
        let mut c = ProcessCollector::new(fs, "/proc");
        let reading = c.collect();
        let procs = reading.as_sequence().unwrap();
        assert_eq!(procs.len(), 1);

        let p = procs[0].as_mapping().unwrap();
        assert_eq!(p.value_of("pId"), Some(&Value::Int(4242)));
        assert_eq!(p.value_of("pName"), Some(&Value::from("python3")));
        assert_eq!(
            p.value_of("pCmdline"),
            Some(&Value::from("python3 -m vllm.entrypoints.openai.api_server"))
        );
        assert_eq!(p.value_of("pCpuTimeUserMode"), Some(&Value::Int(3000)));
        assert_eq!(p.value_of("pNumThreads"), Some(&Value::Int(12)));
        assert_eq!(p.value_of("pVoluntaryContextSwitches"), Some(&Value::Int(15)));
        assert_eq!(p.value_of("pBlockIODelays"), Some(&Value::Int(200)));
        assert_eq!(p.value_of("pResidentSetSize"), Some(&Value::Int(2048 * 4096)));
    }

    #[test]
    fn test_skips_vanished_process() {
        let mut fs = MockFs::typical_system();
        fs.add_dir("/proc/999");
        let mut c = ProcessCollector::new(fs, "/proc");
        assert!(c.collect().is_empty());
    }
}
