//! infprofd - host and inference-server profiler daemon.
//!
//! Samples CPU, memory, disk, network, container, GPU and inference-server
//! metrics at a fixed interval, persists every sample as it is taken, and
//! exports the session as one table on shutdown. Optionally runs a command
//! and profiles for exactly as long as it runs.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::{Child, Command, ExitCode};
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use infprof_core::collector::RealFs;
use infprof_core::config::{METRICS_URL_ENV, ProfilerConfig};
use infprof_core::export::{ExportFormat, FlattenMode};
use infprof_core::session::Profiler;

/// Host and inference-server profiler daemon.
#[derive(Parser, Debug)]
#[command(name = "infprofd", about = "Host and inference-server profiler daemon", version)]
struct Args {
    /// Sampling interval in milliseconds.
    #[arg(short, long, default_value = "1000")]
    interval_ms: u64,

    /// Directory for snapshots and the exported table.
    #[arg(short, long, default_value = "./profiles")]
    output_dir: PathBuf,

    /// Table format written at the end of the session (csv, tsv, jsonl, parquet).
    #[arg(short, long, default_value = "csv")]
    format: ExportFormat,

    /// Keep per-device and per-process sections as one JSON column each.
    #[arg(long)]
    json_nested: bool,

    /// Keep the per-tick snapshot files after the session table is written.
    #[arg(long)]
    no_cleanup: bool,

    /// Prometheus endpoint of the inference server.
    #[arg(long, env = METRICS_URL_ENV, default_value = infprof_core::collector::prometheus::DEFAULT_METRICS_URL)]
    metrics_url: String,

    /// Timeout for one scrape of the metrics endpoint, in milliseconds.
    #[arg(long, default_value = "500")]
    metrics_timeout_ms: u64,

    /// Disable CPU collection.
    #[arg(long)]
    no_cpu: bool,

    /// Disable memory collection.
    #[arg(long)]
    no_memory: bool,

    /// Disable disk I/O collection.
    #[arg(long)]
    no_disk: bool,

    /// Disable network collection.
    #[arg(long)]
    no_network: bool,

    /// Disable container (cgroup) collection.
    #[arg(long)]
    no_container: bool,

    /// Disable GPU collection.
    #[arg(long)]
    no_gpu: bool,

    /// Skip GPU process enumeration; device metrics are still collected.
    #[arg(long)]
    no_gpu_procs: bool,

    /// Disable inference-server scraping.
    #[arg(long)]
    no_vllm: bool,

    /// Sample every process (expensive on busy hosts).
    #[arg(long)]
    processes: bool,

    /// Path to proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to sys filesystem.
    #[arg(long, default_value = "/sys")]
    sys_path: PathBuf,

    /// Path to cgroup filesystem.
    #[arg(long, default_value = "/sys/fs/cgroup")]
    cgroup_path: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Command to run and profile; the session ends when it exits.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Args {
    fn to_config(&self) -> ProfilerConfig {
        ProfilerConfig {
            interval: Duration::from_millis(self.interval_ms),
            output_dir: self.output_dir.clone(),
            format: self.format,
            flatten: if self.json_nested {
                FlattenMode::Json
            } else {
                FlattenMode::Expand
            },
            cleanup: !self.no_cleanup,
            metrics_url: self.metrics_url.clone(),
            metrics_timeout: Duration::from_millis(self.metrics_timeout_ms),
            proc_path: self.proc_path.clone(),
            sys_path: self.sys_path.clone(),
            cgroup_path: self.cgroup_path.clone(),
            enable_cpu: !self.no_cpu,
            enable_memory: !self.no_memory,
            enable_disk: !self.no_disk,
            enable_network: !self.no_network,
            enable_container: !self.no_container,
            enable_gpu: !self.no_gpu,
            enable_gpu_processes: !self.no_gpu_procs,
            enable_vllm: !self.no_vllm,
            enable_processes: self.processes,
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["infprofd", "infprof_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn spawn_command(command: &[String]) -> std::io::Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command"))?;
    Command::new(program).args(args).spawn()
}

/// True while the child is alive; a child that cannot be polled counts as gone.
fn child_alive(child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(None) => true,
        Ok(Some(status)) => {
            info!("Command exited with {}", status);
            false
        }
        Err(e) => {
            warn!("Failed to poll command: {}", e);
            false
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = args.to_config();
    let session_id = uuid::Uuid::new_v4().to_string();

    info!("infprofd {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={:?}, output={}, format={}, session={}",
        config.interval,
        config.output_dir.display(),
        config.format,
        session_id
    );
    debug!("Metrics endpoint: {}", config.metrics_url);

    let mut profiler = match Profiler::from_config(RealFs::new(), &config, &session_id) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to open output directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Setup graceful shutdown
    let running = profiler.running_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut child = if args.command.is_empty() {
        None
    } else {
        match spawn_command(&args.command) {
            Ok(child) => {
                info!("Profiling command: {}", args.command.join(" "));
                Some(child)
            }
            Err(e) => {
                error!("Failed to start '{}': {}", args.command.join(" "), e);
                return ExitCode::FAILURE;
            }
        }
    };

    let ticks = match child.as_mut() {
        Some(child) => profiler.run_while(|| child_alive(child)),
        None => profiler.run(),
    };

    info!("Shutting down after {} snapshots", ticks);
    let mut code = ExitCode::SUCCESS;

    if let Some(mut child) = child {
        if let Ok(None) = child.try_wait() {
            info!("Stopping command (pid {})", child.id());
            if let Err(e) = child.kill() {
                warn!("Failed to kill command: {}", e);
            }
        }
        match child.wait() {
            Ok(status) if !status.success() => code = ExitCode::FAILURE,
            Ok(_) => {}
            Err(e) => warn!("Failed to reap command: {}", e),
        }
    }

    match profiler.finish(config.format, config.flatten, config.cleanup) {
        Ok(Some(path)) => info!("Session table written to {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            error!("Export failed: {}", e);
            code = ExitCode::FAILURE;
        }
    }

    info!("Shutdown complete");
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trailing_command_and_flags() {
        let args = Args::parse_from([
            "infprofd",
            "--interval-ms",
            "250",
            "--format",
            "tsv",
            "--no-gpu",
            "--json-nested",
            "--metrics-url",
            "http://10.0.0.5:8000/metrics",
            "python3",
            "-m",
            "vllm.entrypoints.openai.api_server",
        ]);
        let config = args.to_config();

        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.format, ExportFormat::Tsv);
        assert_eq!(config.flatten, FlattenMode::Json);
        assert!(!config.enable_gpu);
        assert!(config.enable_vllm);
        assert_eq!(config.metrics_url, "http://10.0.0.5:8000/metrics");
        assert_eq!(
            args.command,
            vec!["python3", "-m", "vllm.entrypoints.openai.api_server"]
        );
    }

    #[test]
    fn parses_subsystem_toggles_and_cleanup() {
        let config = Args::parse_from(["infprofd", "--format", "jsonl"]).to_config();
        assert_eq!(config.format, ExportFormat::Jsonl);
        assert!(config.cleanup);
        assert!(config.enable_cpu && config.enable_gpu_processes);

        let config = Args::parse_from([
            "infprofd",
            "--no-cleanup",
            "--no-cpu",
            "--no-memory",
            "--no-disk",
            "--no-network",
            "--no-container",
            "--no-gpu-procs",
        ])
        .to_config();
        assert!(!config.cleanup);
        assert!(!config.enable_cpu);
        assert!(!config.enable_memory);
        assert!(!config.enable_disk);
        assert!(!config.enable_network);
        assert!(!config.enable_container);
        assert!(config.enable_gpu);
        assert!(!config.enable_gpu_processes);
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Args::try_parse_from(["infprofd", "--format", "xlsx"]).is_err());
    }

    #[test]
    fn spawn_empty_command_fails() {
        assert!(spawn_command(&[]).is_err());
    }
}
