//! Metric collectors.
//!
//! Every subsystem implements [`MetricCollector`]; the [`Registry`] owns the
//! active set and runs one sequential pass over it per tick.
//!
//! # Architecture
//!
//! ```text
//!                           Registry
//!      ┌──────────────┬────────────┴───┬──────────────┐
//!      │              │                │              │
//! ┌────▼─────┐ ┌──────▼──────┐ ┌───────▼──────┐ ┌─────▼──────┐
//! │ procfs/* │ │  Container  │ │ GpuCollector │ │ Inference  │
//! │ cpu, mem │ │ cgroup v1/2 │ │              │ │ HTTP GET   │
//! │ disk, net│ │             │ │              │ │ /metrics   │
//! └────┬─────┘ └──────┬──────┘ └───────┬──────┘ └────────────┘
//!      └──────┬───────┘                │
//!      ┌──────▼──────┐          ┌──────▼──────┐
//!      │ FileSystem  │ (trait)  │  GpuDriver  │ (trait)
//!      └──────┬──────┘          └──────┬──────┘
//!      ┌──────┴──────┐          ┌──────┴──────┐
//!   RealFs        MockFs    NvmlDriver      MockGpu
//! ```
//!
//! # Usage
//!
//! ```
//! use infprof_core::collector::{MockFs, Registry};
//! use infprof_core::config::ProfilerConfig;
//!
//! let config = ProfilerConfig::default().host_only();
//! let mut registry = Registry::from_config(MockFs::typical_system(), &config);
//! let sample = registry.collect_metrics();
//! assert!(sample.section("cpu").is_some());
//! ```

pub mod cgroup;
pub mod gpu;
pub mod mock;
pub mod probe;
pub mod procfs;
pub mod prometheus;
mod registry;
pub mod traits;

pub use cgroup::ContainerCollector;
pub use gpu::GpuCollector;
pub use mock::MockFs;
pub use prometheus::InferenceCollector;
pub use registry::{Registry, RegistryTiming};
pub use traits::{FileSystem, MetricCollector, RealFs};
