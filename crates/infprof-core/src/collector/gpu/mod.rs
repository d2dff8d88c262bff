//! Accelerator (NVIDIA) metrics.

mod collector;
mod driver;

pub use collector::{DriverState, GpuCollector, decode_throttle_reasons};
#[cfg(feature = "nvml")]
pub use driver::NvmlDriver;
pub use driver::{DeviceMetric, GpuDriver, GpuError, GpuProcess, GpuProcessUtilization};
