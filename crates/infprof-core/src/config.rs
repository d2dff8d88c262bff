//! Profiler configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::prometheus::DEFAULT_METRICS_URL;
use crate::export::{ExportFormat, FlattenMode};

/// Environment variable overriding the inference-server metrics endpoint.
pub const METRICS_URL_ENV: &str = "VLLM_METRICS_URL";

/// Everything the profiler needs to build its collectors and write output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerConfig {
    /// Target time between tick starts. Default: 1s.
    pub interval: Duration,
    /// Directory for snapshots, static info and the exported table.
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    pub flatten: FlattenMode,
    /// Delete snapshot files once the session table is written.
    pub cleanup: bool,
    pub metrics_url: String,
    /// Upper bound for one scrape of the metrics endpoint. Default: 500ms.
    pub metrics_timeout: Duration,
    pub proc_path: PathBuf,
    pub sys_path: PathBuf,
    pub cgroup_path: PathBuf,
    pub enable_cpu: bool,
    pub enable_memory: bool,
    pub enable_disk: bool,
    pub enable_network: bool,
    pub enable_container: bool,
    pub enable_gpu: bool,
    /// GPU process enumeration; device metrics are still collected when off.
    pub enable_gpu_processes: bool,
    pub enable_vllm: bool,
    /// Per-process sampling is expensive on busy hosts, so it is opt-in.
    pub enable_processes: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            output_dir: PathBuf::from("./profiles"),
            format: ExportFormat::Csv,
            flatten: FlattenMode::Expand,
            cleanup: true,
            metrics_url: DEFAULT_METRICS_URL.to_string(),
            metrics_timeout: Duration::from_millis(500),
            proc_path: PathBuf::from("/proc"),
            sys_path: PathBuf::from("/sys"),
            cgroup_path: PathBuf::from("/sys/fs/cgroup"),
            enable_cpu: true,
            enable_memory: true,
            enable_disk: true,
            enable_network: true,
            enable_container: true,
            enable_gpu: true,
            enable_gpu_processes: true,
            enable_vllm: true,
            enable_processes: false,
        }
    }
}

impl ProfilerConfig {
    /// Defaults with the metrics URL taken from `VLLM_METRICS_URL` when set.
    pub fn from_env() -> Self {
        Self::default().with_metrics_url_override(env::var(METRICS_URL_ENV).ok())
    }

    /// Replaces the metrics URL unless `url` is missing or blank.
    pub fn with_metrics_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url
            && !url.trim().is_empty()
        {
            self.metrics_url = url.trim().to_string();
        }
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Disables every collector that talks to hardware or the network.
    pub fn host_only(mut self) -> Self {
        self.enable_gpu = false;
        self.enable_vllm = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.metrics_url, "http://localhost:8000/metrics");
        assert_eq!(config.metrics_timeout, Duration::from_millis(500));
        assert_eq!(config.format, ExportFormat::Csv);
        assert!(config.enable_gpu && config.enable_vllm);
        assert!(config.enable_cpu && config.enable_memory && config.enable_disk);
        assert!(config.enable_network && config.enable_container);
        assert!(config.enable_gpu_processes);
        assert!(config.cleanup);
        assert!(!config.enable_processes);
    }

    #[test]
    fn test_builders() {
        let config = ProfilerConfig::default()
            .with_output_dir("/tmp/out")
            .with_interval(Duration::from_millis(250))
            .host_only();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.interval, Duration::from_millis(250));
        assert!(!config.enable_gpu);
        assert!(!config.enable_vllm);
    }

    #[test]
    fn test_metrics_url_override() {
        let config = ProfilerConfig::default()
            .with_metrics_url_override(Some(" http://10.0.0.7:8000/metrics \n".to_string()));
        assert_eq!(config.metrics_url, "http://10.0.0.7:8000/metrics");

        let config = ProfilerConfig::default().with_metrics_url_override(Some("  ".to_string()));
        assert_eq!(config.metrics_url, DEFAULT_METRICS_URL);
        let config = ProfilerConfig::default().with_metrics_url_override(None);
        assert_eq!(config.metrics_url, DEFAULT_METRICS_URL);
    }
}
