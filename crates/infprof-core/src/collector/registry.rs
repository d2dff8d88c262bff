//! Registry: the set of active collectors and one tick's dispatch over them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::cgroup::ContainerCollector;
use super::gpu::{GpuCollector, GpuDriver};
use super::probe::now_ns;
use super::procfs::{
    CpuCollector, DiskCollector, MemoryCollector, NetworkCollector, ProcessCollector, host,
};
use super::prometheus::InferenceCollector;
use super::traits::{FileSystem, MetricCollector};
use crate::config::ProfilerConfig;
use crate::model::{Reading, Sample, StaticInfo};
use crate::util::is_container;

/// Timing of the last `collect_metrics` call.
#[derive(Debug, Clone, Default)]
pub struct RegistryTiming {
    pub total: Duration,
    /// Per-collector wall time, in registration order.
    pub sections: Vec<(&'static str, Duration)>,
}

impl RegistryTiming {
    pub fn section(&self, name: &str) -> Option<Duration> {
        self.sections
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, d)| *d)
    }
}

/// Builds the production GPU driver, if compiled in.
fn default_gpu_driver() -> Option<Box<dyn GpuDriver>> {
    #[cfg(feature = "nvml")]
    {
        Some(Box::new(super::gpu::NvmlDriver::new()))
    }
    #[cfg(not(feature = "nvml"))]
    {
        None
    }
}

/// Owns every collector and turns one pass over them into a `Sample`.
///
/// A collector that panics is isolated: its section is simply missing from
/// that tick.
pub struct Registry<F: FileSystem + Clone + 'static> {
    fs: F,
    proc_path: PathBuf,
    collectors: Vec<Box<dyn MetricCollector>>,
    static_info: Option<StaticInfo>,
    last_timestamp: i64,
    last_timing: Option<RegistryTiming>,
    closed: bool,
}

impl<F: FileSystem + Clone + 'static> Registry<F> {
    /// Empty registry; collectors are added with `register`.
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            collectors: Vec::new(),
            static_info: None,
            last_timestamp: 0,
            last_timing: None,
            closed: false,
        }
    }

    /// Registers the collector set described by `config`, skipping any
    /// subsystem it disables.
    ///
    /// Hardware-specific collectors never fail construction; the GPU driver
    /// is initialised here and an unavailable driver just yields empty
    /// sections.
    pub fn from_config(fs: F, config: &ProfilerConfig) -> Self {
        let proc = &config.proc_path;
        let sys = &config.sys_path;
        let mut registry = Self::new(fs.clone(), proc.clone());

        if config.enable_cpu {
            registry.register(Box::new(CpuCollector::new(fs.clone(), proc, sys)));
        }
        if config.enable_memory {
            registry.register(Box::new(MemoryCollector::new(fs.clone(), proc)));
        }
        if config.enable_disk {
            registry.register(Box::new(DiskCollector::new(fs.clone(), proc, sys)));
        }
        if config.enable_network {
            registry.register(Box::new(NetworkCollector::new(fs.clone(), proc, sys)));
        }
        if config.enable_container {
            if is_container(&fs, proc) {
                info!("Container environment detected");
            }
            registry.register(Box::new(ContainerCollector::new(
                fs.clone(),
                &config.cgroup_path,
                proc,
            )));
        }

        if config.enable_processes {
            registry.register(Box::new(ProcessCollector::new(fs.clone(), proc)));
        }

        if config.enable_gpu {
            let mut gpu = GpuCollector::new(default_gpu_driver(), fs.clone(), proc)
                .with_processes(config.enable_gpu_processes);
            if !gpu.init() {
                debug!("GPU driver unavailable, nvidia section will be empty");
            }
            registry.register(Box::new(gpu));
        }

        if config.enable_vllm {
            registry.register(Box::new(InferenceCollector::new(
                config.metrics_url.clone(),
                config.metrics_timeout,
            )));
        }

        info!("Registered collectors: {}", registry.names().join(", "));
        registry
    }

    /// Adds a collector, replacing any existing one with the same name.
    pub fn register(&mut self, collector: Box<dyn MetricCollector>) {
        let name = collector.name();
        match self.collectors.iter().position(|c| c.name() == name) {
            Some(pos) => self.collectors[pos] = collector,
            None => self.collectors.push(collector),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    pub fn last_timing(&self) -> Option<&RegistryTiming> {
        self.last_timing.as_ref()
    }

    /// Runs one tick over all collectors. Never fails.
    ///
    /// The sample timestamp is strictly greater than the previous one even
    /// if the wall clock stalls or steps back.
    pub fn collect_metrics(&mut self) -> Sample {
        let total_start = Instant::now();
        let mut timing = RegistryTiming::default();

        let mut timestamp = now_ns();
        if timestamp <= self.last_timestamp {
            timestamp = self.last_timestamp + 1;
        }
        self.last_timestamp = timestamp;

        let mut sample = Sample::new(timestamp);
        for collector in &mut self.collectors {
            let name = collector.name();
            let start = Instant::now();
            let reading = match catch_unwind(AssertUnwindSafe(|| collector.collect())) {
                Ok(reading) => reading,
                Err(_) => {
                    warn!("{}: collector panicked, section skipped this tick", name);
                    Reading::empty()
                }
            };
            timing.sections.push((name, start.elapsed()));

            if !reading.is_empty() {
                sample.sections.insert(name.to_string(), reading);
            }
        }

        timing.total = total_start.elapsed();
        self.last_timing = Some(timing);
        sample
    }

    /// Host identity plus each collector's static facts, captured once.
    pub fn get_static_info(&mut self, session_id: &str) -> StaticInfo {
        if let Some(info) = &self.static_info {
            return info.clone();
        }

        let mut info = StaticInfo {
            session_id: session_id.to_string(),
            timestamp: now_ns(),
            hostname: host::hostname(&self.fs, &self.proc_path),
            kernel: host::kernel_info(&self.fs, &self.proc_path),
            boot_time: host::boot_time(&self.fs, &self.proc_path),
            ..StaticInfo::default()
        };

        for collector in &mut self.collectors {
            let name = collector.name();
            match catch_unwind(AssertUnwindSafe(|| collector.static_info())) {
                Ok(fields) if !fields.is_empty() => {
                    info.sections.insert(name.to_string(), fields);
                }
                Ok(_) => {}
                Err(_) => warn!("{}: static info panicked", name),
            }
        }

        self.static_info = Some(info.clone());
        info
    }

    /// Releases collector resources (the GPU driver handle). Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for collector in &mut self.collectors {
            if catch_unwind(AssertUnwindSafe(|| collector.cleanup())).is_err() {
                warn!("{}: cleanup panicked", collector.name());
            }
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<F: FileSystem + Clone + 'static> Drop for Registry<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockDevice, MockFs, MockGpu};
    use crate::model::{Fields, FieldsExt, Value};

    fn host_registry(fs: MockFs) -> Registry<MockFs> {
        let config = ProfilerConfig::default().host_only();
        Registry::from_config(fs, &config)
    }

    struct Exploding;

    impl MetricCollector for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn collect(&mut self) -> Reading {
            panic!("boom");
        }
    }

    struct Constant(&'static str);

    impl MetricCollector for Constant {
        fn name(&self) -> &'static str {
            self.0
        }

        fn collect(&mut self) -> Reading {
            let mut f = Fields::new();
            f.put_plain("answer", 42);
            Reading::Mapping(f)
        }
    }

    #[test]
    fn test_from_config_host_only() {
        let registry = host_registry(MockFs::typical_system());
        assert_eq!(
            registry.names(),
            vec!["cpu", "memory", "disk", "network", "container"]
        );
    }

    #[test]
    fn test_from_config_subsystem_toggles() {
        let config = ProfilerConfig {
            enable_cpu: false,
            enable_disk: false,
            enable_container: false,
            ..ProfilerConfig::default().host_only()
        };
        let registry = Registry::from_config(MockFs::typical_system(), &config);
        assert_eq!(registry.names(), vec!["memory", "network"]);

        let config = ProfilerConfig {
            enable_memory: false,
            enable_network: false,
            enable_processes: true,
            ..ProfilerConfig::default().host_only()
        };
        let registry = Registry::from_config(MockFs::typical_system(), &config);
        assert_eq!(
            registry.names(),
            vec!["cpu", "disk", "container", "processes"]
        );
    }

    #[test]
    fn test_collect_skips_empty_sections() {
        let mut registry = host_registry(MockFs::typical_system());
        let sample = registry.collect_metrics();

        assert!(sample.section("cpu").is_some());
        assert!(sample.section("memory").is_some());
        assert!(sample.section("disk").is_some());
        assert!(sample.section("network").is_some());
        // typical_system has no cgroup hierarchy
        assert!(sample.section("container").is_none());

        let timing = registry.last_timing().unwrap();
        assert_eq!(timing.sections.len(), 5);
        assert!(timing.section("cpu").is_some());
    }

    #[test]
    fn test_panicking_collector_is_isolated() {
        let mut registry = Registry::new(MockFs::new(), "/proc");
        registry.register(Box::new(Exploding));
        registry.register(Box::new(Constant("steady")));

        let sample = registry.collect_metrics();
        assert!(sample.section("exploding").is_none());
        let steady = sample.section("steady").unwrap().as_mapping().unwrap();
        assert_eq!(steady.value_of("answer"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut registry = Registry::new(MockFs::new(), "/proc");
        registry.register(Box::new(Constant("steady")));

        let mut last = 0;
        for _ in 0..50 {
            let ts = registry.collect_metrics().timestamp;
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = Registry::new(MockFs::new(), "/proc");
        registry.register(Box::new(Constant("a")));
        registry.register(Box::new(Constant("b")));
        registry.register(Box::new(Constant("a")));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_static_info_cached() {
        let mut registry = host_registry(MockFs::cgroup_v2_container());
        let info = registry.get_static_info("session-1");

        assert_eq!(info.session_id, "session-1");
        assert_eq!(info.hostname, "3f4e5d6c7b8a");
        assert!(info.sections.contains_key("container"));

        let again = registry.get_static_info("other");
        assert_eq!(again, info);
    }

    #[test]
    fn test_close_is_idempotent_and_releases_gpu() {
        let gpu = MockGpu::new(vec![MockDevice::busy(0)]);
        let mut registry = Registry::new(MockFs::typical_system(), "/proc");
        registry.register(Box::new(GpuCollector::new(
            Some(Box::new(gpu.clone())),
            MockFs::typical_system(),
            "/proc",
        )));

        let sample = registry.collect_metrics();
        assert!(sample.section("nvidia").is_some());

        registry.close();
        registry.close();
        drop(registry);
        assert_eq!(gpu.init_calls(), 1);
        assert_eq!(gpu.shutdown_calls(), 1);
    }
}
