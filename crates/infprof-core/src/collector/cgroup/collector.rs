//! Container collector for cgroup v1 and v2 hierarchies.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::parser::{
    CgroupVersion, parse_blkio_sectors, parse_blkio_service_bytes, parse_cpu_stat,
    parse_cpuacct_stat, parse_io_stat, parse_usage_percpu,
};
use crate::collector::probe::{JIFFIES_PER_SECOND, read_int, read_kv, read_lines, read_string};
use crate::collector::procfs::read_net_totals;
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading};
use crate::util::{container_id, is_container};

/// Microseconds per jiffy at 100 Hz.
const USEC_PER_JIFFY: i64 = 1_000_000 / JIFFIES_PER_SECOND;

/// Reads the container's own resource accounting.
///
/// CPU time `cCpuTime` is nanoseconds on both layouts; user/kernel times use
/// the same centisecond scale as the host CPU collector.
pub struct ContainerCollector<F: FileSystem> {
    fs: F,
    cgroup_path: PathBuf,
    proc_path: PathBuf,
}

impl<F: FileSystem> ContainerCollector<F> {
    pub fn new(fs: F, cgroup_path: impl AsRef<Path>, proc_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            cgroup_path: cgroup_path.as_ref().to_path_buf(),
            proc_path: proc_path.as_ref().to_path_buf(),
        }
    }

    /// `cgroup.controllers` marks the unified (v2) hierarchy; v1 is recognised
    /// by its per-controller directories.
    pub fn version(&self) -> Option<CgroupVersion> {
        if self.fs.exists(&self.cgroup_path.join("cgroup.controllers")) {
            Some(CgroupVersion::V2)
        } else if self.fs.exists(&self.cgroup_path.join("cpuacct"))
            || self.fs.exists(&self.cgroup_path.join("memory"))
        {
            Some(CgroupVersion::V1)
        } else {
            None
        }
    }

    fn collect_v2(&self, fields: &mut Fields) {
        let (content, t_cpu) = read_string(&self.fs, &self.cgroup_path.join("cpu.stat"));
        if !content.is_empty() {
            let cpu = parse_cpu_stat(&content);
            fields.put("cCpuTime", cpu.usage_usec * 1000, t_cpu);
            fields.put(
                "cCpuTimeUserMode",
                cpu.user_usec / USEC_PER_JIFFY * JIFFIES_PER_SECOND,
                t_cpu,
            );
            fields.put(
                "cCpuTimeKernelMode",
                cpu.system_usec / USEC_PER_JIFFY * JIFFIES_PER_SECOND,
                t_cpu,
            );
        }

        let (used, t_used) = read_int(&self.fs, &self.cgroup_path.join("memory.current"));
        fields.put("cMemoryUsed", used, t_used);
        let (peak, t_peak) = read_int(&self.fs, &self.cgroup_path.join("memory.peak"));
        fields.put("cMemoryMaxUsed", peak, t_peak);
        self.put_page_faults(&self.cgroup_path.join("memory.stat"), fields);

        let (content, t_io) = read_string(&self.fs, &self.cgroup_path.join("io.stat"));
        let (read, write) = parse_io_stat(&content);
        fields.put("cDiskReadBytes", read, t_io);
        fields.put("cDiskWriteBytes", write, t_io);

        let (procs, t_procs) = read_int(&self.fs, &self.cgroup_path.join("pids.current"));
        fields.put("cNumProcesses", procs, t_procs);
    }

    /// `pgfault` and `pgmajfault` from a `memory.stat` file; same keys on both layouts.
    fn put_page_faults(&self, path: &Path, fields: &mut Fields) {
        let (stat, ts) = read_kv(&self.fs, path, None);
        let counter = |key: &str| {
            stat.get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };
        fields.put("cPgFault", counter("pgfault"), ts);
        fields.put("cMajorPgFault", counter("pgmajfault"), ts);
    }

    /// `pids.current` when the pids controller is mounted, else the number of
    /// tasks in the cpuacct group.
    fn process_count_v1(&self) -> (i64, i64) {
        let (count, ts) = read_int(&self.fs, &self.cgroup_path.join("pids/pids.current"));
        if count > 0 {
            return (count, ts);
        }
        let (tasks, ts) = read_lines(&self.fs, &self.cgroup_path.join("cpuacct/tasks"));
        let count = tasks.iter().filter(|l| !l.trim().is_empty()).count();
        (i64::try_from(count).unwrap_or(i64::MAX), ts)
    }

    fn collect_v1(&self, fields: &mut Fields) {
        let cpuacct = self.cgroup_path.join("cpuacct");

        let (usage, t_usage) = read_int(&self.fs, &cpuacct.join("cpuacct.usage"));
        fields.put("cCpuTime", usage, t_usage);

        let (content, t_stat) = read_string(&self.fs, &cpuacct.join("cpuacct.stat"));
        let (user, system) = parse_cpuacct_stat(&content);
        fields.put("cCpuTimeUserMode", user * JIFFIES_PER_SECOND, t_stat);
        fields.put("cCpuTimeKernelMode", system * JIFFIES_PER_SECOND, t_stat);

        let (content, t_percpu) = read_string(&self.fs, &cpuacct.join("cpuacct.usage_percpu"));
        for (i, ns) in parse_usage_percpu(&content).into_iter().enumerate() {
            fields.put(&format!("cCpu{}Time", i), ns, t_percpu);
        }

        let memory = self.cgroup_path.join("memory");
        let (used, t_used) = read_int(&self.fs, &memory.join("memory.usage_in_bytes"));
        fields.put("cMemoryUsed", used, t_used);
        let (peak, t_peak) = read_int(&self.fs, &memory.join("memory.max_usage_in_bytes"));
        fields.put("cMemoryMaxUsed", peak, t_peak);
        self.put_page_faults(&memory.join("memory.stat"), fields);

        let blkio = self.cgroup_path.join("blkio");
        let (content, t_io) = read_string(&self.fs, &blkio.join("blkio.throttle.io_service_bytes"));
        let (read, write) = parse_blkio_service_bytes(&content);
        fields.put("cDiskReadBytes", read, t_io);
        fields.put("cDiskWriteBytes", write, t_io);

        let (content, t_sectors) = read_string(&self.fs, &blkio.join("blkio.sectors"));
        fields.put("cDiskSectorIO", parse_blkio_sectors(&content), t_sectors);

        let (procs, t_procs) = self.process_count_v1();
        fields.put("cNumProcesses", procs, t_procs);
    }
}

impl<F: FileSystem> MetricCollector for ContainerCollector<F> {
    fn name(&self) -> &'static str {
        "container"
    }

    fn collect(&mut self) -> Reading {
        let Some(version) = self.version() else {
            debug!("container: no cgroup hierarchy at {:?}", self.cgroup_path);
            return Reading::empty();
        };

        let mut fields = Fields::new();
        match version {
            CgroupVersion::V2 => self.collect_v2(&mut fields),
            CgroupVersion::V1 => self.collect_v1(&mut fields),
        }

        // Best effort: only container-scoped when /proc is the container's netns.
        if let Some((net, ts)) = read_net_totals(&self.fs, &self.proc_path) {
            fields.put("cNetworkBytesRecvd", net.rx_bytes, ts);
            fields.put("cNetworkBytesSent", net.tx_bytes, ts);
        }

        Reading::Mapping(fields)
    }

    fn static_info(&mut self) -> Fields {
        let mut fields = Fields::new();
        let Some(version) = self.version() else {
            return fields;
        };

        fields.put_plain("cId", container_id(&self.fs, &self.proc_path));
        fields.put_plain("cCgroupVersion", version.as_str());
        fields.put_plain(
            "cInContainer",
            i64::from(is_container(&self.fs, &self.proc_path)),
        );

        let cpus = match version {
            CgroupVersion::V1 => {
                let (content, _) = read_string(
                    &self.fs,
                    &self.cgroup_path.join("cpuacct/cpuacct.usage_percpu"),
                );
                parse_usage_percpu(&content).len()
            }
            CgroupVersion::V2 => 0,
        };
        let cpus = if cpus > 0 {
            cpus
        } else {
            std::thread::available_parallelism().map_or(0, |n| n.get())
        };
        fields.put_plain("cNumProcessors", cpus);
        fields
    }
}
