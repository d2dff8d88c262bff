//! Polling scheduler.
//!
//! One tick is a full sequential pass over the registry followed by a durable
//! write of the resulting sample. Ticks are paced by subtracting the time the
//! tick took from the interval; an overrunning tick is followed immediately
//! by the next one, without catch-up.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::collector::{FileSystem, Registry};
use crate::config::ProfilerConfig;
use crate::export::{ExportFormat, FlattenMode};
use crate::model::{Reading, Sample, StaticInfo};
use crate::storage::{SessionStore, StoreError};

/// Granularity at which the stop conditions are checked while sleeping.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Short description of a sample for logging: `cpu, memory, 2 nvidia`.
pub fn describe_sample(sample: &Sample) -> String {
    sample
        .sections
        .iter()
        .map(|(name, reading)| match reading {
            Reading::Sequence(items) => format!("{} {}", items.len(), name),
            Reading::Mapping(fields) if name == "vllm" => format!("vllm ({} fields)", fields.len()),
            _ => name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct Profiler<F: FileSystem + Clone + 'static> {
    registry: Registry<F>,
    store: SessionStore,
    interval: Duration,
    running: Arc<AtomicBool>,
    static_info: Option<StaticInfo>,
    ticks: u64,
}

impl<F: FileSystem + Clone + 'static> Profiler<F> {
    pub fn new(registry: Registry<F>, store: SessionStore, interval: Duration) -> Self {
        Self {
            registry,
            store,
            interval,
            running: Arc::new(AtomicBool::new(true)),
            static_info: None,
            ticks: 0,
        }
    }

    /// Builds the registry from `config` and opens `{output_dir}` for `session_id`.
    pub fn from_config(
        fs: F,
        config: &ProfilerConfig,
        session_id: &str,
    ) -> Result<Self, StoreError> {
        let store = SessionStore::new(&config.output_dir, session_id)?;
        let registry = Registry::from_config(fs, config);
        Ok(Self::new(registry, store, config.interval))
    }

    /// Shared flag; storing `false` stops `run` within one sleep slice.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn registry(&self) -> &Registry<F> {
        &self.registry
    }

    /// Captures and persists static info. Later calls return the first result.
    pub fn start(&mut self) -> Result<StaticInfo, StoreError> {
        if let Some(info) = &self.static_info {
            return Ok(info.clone());
        }
        let info = self.registry.get_static_info(self.store.session_id());
        self.store.save_static(&info)?;
        info!(
            "Session {} on {} ({})",
            info.session_id, info.hostname, info.kernel
        );
        self.static_info = Some(info.clone());
        Ok(info)
    }

    /// Collects one sample and writes it before returning.
    pub fn tick(&mut self) -> Result<Sample, StoreError> {
        let sample = self.registry.collect_metrics();
        self.store.save_snapshot(&sample)?;
        self.ticks += 1;

        if let Some(timing) = self.registry.last_timing() {
            debug!(
                "Snapshot #{}: {} in {:?}",
                self.ticks,
                describe_sample(&sample),
                timing.total
            );
        }
        Ok(sample)
    }

    /// Runs exactly `n` ticks back to back, without pacing.
    pub fn run_ticks(&mut self, n: u64) -> Result<u64, StoreError> {
        self.start()?;
        for _ in 0..n {
            self.tick()?;
        }
        Ok(n)
    }

    /// Runs until the running flag is cleared. Returns the number of ticks.
    pub fn run(&mut self) -> u64 {
        self.run_while(|| true)
    }

    /// Runs until the running flag is cleared or `keep_going` returns false.
    /// Both are checked between sleep slices as well as between ticks.
    ///
    /// A failed write is logged and the loop continues: one lost tick must
    /// not end the session.
    pub fn run_while(&mut self, mut keep_going: impl FnMut() -> bool) -> u64 {
        if let Err(e) = self.start() {
            error!("Failed to save static info: {}", e);
        }

        let first = self.ticks;
        info!("Starting collection loop (interval {:?})", self.interval);

        while self.is_running() && keep_going() {
            let tick_start = Instant::now();
            if let Err(e) = self.tick() {
                error!("Failed to persist snapshot: {}", e);
            }

            let elapsed = tick_start.elapsed();
            let remaining = self.interval.saturating_sub(elapsed);
            if remaining.is_zero() {
                debug!("Tick took {:?}, longer than the interval", elapsed);
            }
            if !self.sleep_while(remaining, &mut keep_going) {
                break;
            }
        }

        self.ticks - first
    }

    /// Sleeps up to `remaining` in slices. Returns false once `keep_going` does.
    fn sleep_while(&self, mut remaining: Duration, keep_going: &mut impl FnMut() -> bool) -> bool {
        while remaining > Duration::ZERO && self.is_running() {
            if !keep_going() {
                return false;
            }
            let sleep_time = remaining.min(SLEEP_SLICE);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
        true
    }

    /// Releases collector resources and exports the session table. With
    /// `cleanup` the snapshot files are removed after a successful export.
    pub fn finish(
        &mut self,
        format: ExportFormat,
        mode: FlattenMode,
        cleanup: bool,
    ) -> Result<Option<PathBuf>, StoreError> {
        self.stop();
        self.registry.close();
        info!("Collected {} snapshots, exporting", self.ticks);
        self.store.export(format, mode, cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use tempfile::TempDir;

    fn profiler(dir: &TempDir, interval: Duration) -> Profiler<MockFs> {
        let config = ProfilerConfig::default()
            .host_only()
            .with_output_dir(dir.path())
            .with_interval(interval);
        Profiler::from_config(MockFs::typical_system(), &config, "e2e").unwrap()
    }

    #[test]
    fn test_three_ticks_end_to_end() {
        let dir = TempDir::new().unwrap();
        let mut p = profiler(&dir, Duration::from_secs(1));

        assert_eq!(p.run_ticks(3).unwrap(), 3);
        let path = p
            .finish(ExportFormat::Csv, FlattenMode::Expand, false)
            .unwrap()
            .unwrap();
        assert!(p.registry().is_closed());

        let samples = p.store().load_snapshots().unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(p.store().static_path().exists());

        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "timestamp");
        for column in [
            "vCpuTime",
            "vMemoryTotal",
            "vDiskReadBytes",
            "vNetworkBytesRecvd",
        ] {
            assert!(headers.iter().any(|h| h == column), "missing {}", column);
        }

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        let ts: Vec<i64> = rows.iter().map(|r| r[0].parse().unwrap()).collect();
        assert_eq!(ts, samples.iter().map(|s| s.timestamp).collect::<Vec<_>>());
    }

    #[test]
    fn test_start_is_saved_once() {
        let dir = TempDir::new().unwrap();
        let mut p = profiler(&dir, Duration::from_secs(1));
        let first = p.start().unwrap().timestamp;
        let second = p.start().unwrap().timestamp;
        assert_eq!(first, second);
        assert_eq!(p.store().load_static().unwrap().hostname, "gpu-node-1");
    }

    #[test]
    fn test_run_stops_on_flag() {
        let dir = TempDir::new().unwrap();
        let mut p = profiler(&dir, Duration::from_millis(50));
        let flag = p.running_flag();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.store(false, Ordering::SeqCst);
        });
        let ticks = p.run();
        stopper.join().unwrap();

        assert!(ticks >= 1);
        assert_eq!(p.store().load_snapshots().unwrap().len() as u64, ticks);
    }

    #[test]
    fn test_overrun_runs_back_to_back() {
        let dir = TempDir::new().unwrap();
        let mut p = profiler(&dir, Duration::ZERO);
        let mut budget = 4;
        let started = Instant::now();
        let ticks = p.run_while(|| {
            budget -= 1;
            budget >= 0
        });
        assert_eq!(ticks, 4);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_keep_going_checked_while_sleeping() {
        let dir = TempDir::new().unwrap();
        let mut p = profiler(&dir, Duration::from_secs(10));
        let mut calls = 0;
        let started = Instant::now();
        let ticks = p.run_while(|| {
            calls += 1;
            calls < 3
        });
        assert_eq!(ticks, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_finish_with_cleanup_keeps_only_outputs() {
        let dir = TempDir::new().unwrap();
        let mut p = profiler(&dir, Duration::from_secs(1));
        p.run_ticks(2).unwrap();
        let path = p
            .finish(ExportFormat::Jsonl, FlattenMode::Expand, true)
            .unwrap()
            .unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 2);
        assert!(p.store().snapshot_files().unwrap().is_empty());
        assert!(p.store().static_path().exists());
    }

    #[test]
    fn test_describe_sample() {
        let mut sample = Sample::new(1);
        sample.sections.insert("cpu".to_string(), Reading::empty());
        sample.sections.insert(
            "nvidia".to_string(),
            Reading::Sequence(vec![Reading::empty(), Reading::empty()]),
        );
        assert_eq!(describe_sample(&sample), "cpu, 2 nvidia");
    }
}
