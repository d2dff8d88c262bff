//! Container (cgroup) metrics.
//!
//! Supports both the legacy per-controller v1 layout and the unified v2
//! hierarchy; the layout is detected on every tick.

mod collector;
pub mod parser;

pub use collector::ContainerCollector;
pub use parser::CgroupVersion;
