//! Accelerator driver interface.
//!
//! `GpuDriver` hides the vendor library behind a handful of calls so the
//! collector can be driven by NVML in production and by `MockGpu` in tests.
//! Each device metric is a separate call: one unsupported query must not
//! take the others down with it.

use std::fmt;

use crate::model::Value;

/// Per-device query understood by a [`GpuDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMetric {
    /// Percent of time a kernel was executing.
    UtilizationGpu,
    /// Percent of time device memory was being read or written.
    UtilizationMemory,
    UtilizationEncoder,
    UtilizationDecoder,
    MemoryTotal,
    MemoryUsed,
    MemoryFree,
    Bar1Used,
    Bar1Free,
    /// Degrees Celsius.
    Temperature,
    /// HBM temperature, degrees Celsius.
    TemperatureMemory,
    /// Percent of maximum fan speed.
    FanSpeed,
    /// Milliwatts.
    PowerDraw,
    /// Milliwatts.
    PowerLimit,
    /// Millijoules since the driver was loaded.
    EnergyConsumption,
    ClockGraphics,
    ClockSm,
    ClockMemory,
    ClockVideo,
    /// KB/s.
    PcieTx,
    /// KB/s.
    PcieRx,
    PcieLinkGen,
    PcieLinkWidth,
    PcieReplayCounter,
    /// `"P0"`..`"P15"`.
    PerformanceState,
    /// Raw clock event (throttle) reason bitmask.
    ClocksEventReasons,
    /// Cumulative nanoseconds spent throttled, per policy.
    ViolationPower,
    ViolationThermal,
    ViolationReliability,
    ViolationBoardLimit,
    ViolationLowUtil,
    ViolationSyncBoost,
    /// Corrected (single-bit) ECC errors since driver load.
    EccVolatileSbe,
    /// Uncorrected (double-bit) ECC errors since driver load.
    EccVolatileDbe,
    EccAggregateSbe,
    EccAggregateDbe,
    Name,
    Uuid,
    Serial,
    Brand,
    Architecture,
    VbiosVersion,
    PciBusId,
    PcieMaxLinkGen,
    PcieMaxLinkWidth,
    MaxClockGraphics,
    MaxClockSm,
    MaxClockMemory,
    MaxClockVideo,
    /// Milliwatts.
    PowerDefaultLimit,
    PowerMinLimit,
    PowerMaxLimit,
}

impl DeviceMetric {
    /// Metrics whose value is text rather than a counter or gauge.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            DeviceMetric::PerformanceState
                | DeviceMetric::Name
                | DeviceMetric::Uuid
                | DeviceMetric::Serial
                | DeviceMetric::Brand
                | DeviceMetric::Architecture
                | DeviceMetric::VbiosVersion
                | DeviceMetric::PciBusId
        )
    }
}

/// A process holding a context on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuProcess {
    pub pid: u32,
    /// `None` when the driver cannot attribute memory (e.g. inside containers).
    pub used_memory: Option<u64>,
}

/// One per-process utilization sample, percent over the driver's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuProcessUtilization {
    pub pid: u32,
    pub sm_util: u32,
    pub mem_util: u32,
}

/// Error from the accelerator driver.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuError {
    /// A query was issued before `init` or after `shutdown`.
    NotInitialized,
    /// The driver library is missing or refused to start.
    Unavailable(String),
    /// The device does not support this query.
    NotSupported,
    Driver(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NotInitialized => write!(f, "GPU driver not initialized"),
            GpuError::Unavailable(msg) => write!(f, "GPU driver unavailable: {}", msg),
            GpuError::NotSupported => write!(f, "not supported by this device"),
            GpuError::Driver(msg) => write!(f, "GPU driver error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// Process-wide accelerator driver handle.
pub trait GpuDriver: Send {
    fn init(&mut self) -> Result<(), GpuError>;
    fn shutdown(&mut self) -> Result<(), GpuError>;
    fn device_count(&self) -> Result<u32, GpuError>;
    fn driver_version(&self) -> Result<String, GpuError>;
    /// Runtime version as `"major.minor"`.
    fn cuda_version(&self) -> Result<String, GpuError>;
    fn metric(&self, index: u32, metric: DeviceMetric) -> Result<Value, GpuError>;
    fn compute_processes(&self, index: u32) -> Result<Vec<GpuProcess>, GpuError>;
    fn graphics_processes(&self, index: u32) -> Result<Vec<GpuProcess>, GpuError>;
    fn process_utilization(&self, index: u32) -> Result<Vec<GpuProcessUtilization>, GpuError>;
}

#[cfg(feature = "nvml")]
pub use nvml::NvmlDriver;

#[cfg(feature = "nvml")]
mod nvml {
    use nvml_wrapper::enum_wrappers::device::{
        Clock, EccCounter, MemoryError, PcieUtilCounter, PerformancePolicy, PerformanceState,
        TemperatureSensor,
    };
    use nvml_wrapper::enums::device::UsedGpuMemory;
    use nvml_wrapper::error::NvmlError;
    use nvml_wrapper::struct_wrappers::device::ProcessInfo;
    use nvml_wrapper::{Device, Nvml};

    use super::{DeviceMetric, GpuDriver, GpuError, GpuProcess, GpuProcessUtilization};
    use crate::model::Value;

    impl From<NvmlError> for GpuError {
        fn from(e: NvmlError) -> Self {
            match e {
                NvmlError::NotSupported => GpuError::NotSupported,
                NvmlError::Uninitialized => GpuError::NotInitialized,
                other => GpuError::Driver(other.to_string()),
            }
        }
    }

    /// NVML-backed driver.
    #[derive(Default)]
    pub struct NvmlDriver {
        nvml: Option<Nvml>,
    }

    impl NvmlDriver {
        pub fn new() -> Self {
            Self::default()
        }

        fn nvml(&self) -> Result<&Nvml, GpuError> {
            self.nvml.as_ref().ok_or(GpuError::NotInitialized)
        }

        fn device(&self, index: u32) -> Result<Device<'_>, GpuError> {
            Ok(self.nvml()?.device_by_index(index)?)
        }
    }

    fn to_processes(infos: Vec<ProcessInfo>) -> Vec<GpuProcess> {
        infos
            .into_iter()
            .map(|p| GpuProcess {
                pid: p.pid,
                used_memory: match p.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => Some(bytes),
                    UsedGpuMemory::Unavailable => None,
                },
            })
            .collect()
    }

    impl GpuDriver for NvmlDriver {
        fn init(&mut self) -> Result<(), GpuError> {
            if self.nvml.is_none() {
                let nvml = Nvml::init().map_err(|e| GpuError::Unavailable(e.to_string()))?;
                self.nvml = Some(nvml);
            }
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), GpuError> {
            match self.nvml.take() {
                Some(nvml) => Ok(nvml.shutdown()?),
                None => Ok(()),
            }
        }

        fn device_count(&self) -> Result<u32, GpuError> {
            Ok(self.nvml()?.device_count()?)
        }

        fn driver_version(&self) -> Result<String, GpuError> {
            Ok(self.nvml()?.sys_driver_version()?)
        }

        fn cuda_version(&self) -> Result<String, GpuError> {
            let v = self.nvml()?.sys_cuda_driver_version()?;
            Ok(format!(
                "{}.{}",
                nvml_wrapper::cuda_driver_version_major(v),
                nvml_wrapper::cuda_driver_version_minor(v)
            ))
        }

        fn metric(&self, index: u32, metric: DeviceMetric) -> Result<Value, GpuError> {
            let d = self.device(index)?;
            let value = match metric {
                DeviceMetric::UtilizationGpu => Value::from(d.utilization_rates()?.gpu),
                DeviceMetric::UtilizationMemory => Value::from(d.utilization_rates()?.memory),
                DeviceMetric::UtilizationEncoder => {
                    Value::from(d.encoder_utilization()?.utilization)
                }
                DeviceMetric::UtilizationDecoder => {
                    Value::from(d.decoder_utilization()?.utilization)
                }
                DeviceMetric::MemoryTotal => Value::from(d.memory_info()?.total),
                DeviceMetric::MemoryUsed => Value::from(d.memory_info()?.used),
                DeviceMetric::MemoryFree => Value::from(d.memory_info()?.free),
                DeviceMetric::Bar1Used => Value::from(d.bar1_memory_info()?.used),
                DeviceMetric::Bar1Free => Value::from(d.bar1_memory_info()?.free),
                DeviceMetric::Temperature => Value::from(d.temperature(TemperatureSensor::Gpu)?),
                // only exposed through the field-value API, which is not wrapped
                DeviceMetric::TemperatureMemory => return Err(GpuError::NotSupported),
                DeviceMetric::FanSpeed => Value::from(d.fan_speed(0)?),
                DeviceMetric::PowerDraw => Value::from(d.power_usage()?),
                DeviceMetric::PowerLimit => Value::from(d.enforced_power_limit()?),
                DeviceMetric::EnergyConsumption => Value::from(d.total_energy_consumption()?),
                DeviceMetric::ClockGraphics => Value::from(d.clock_info(Clock::Graphics)?),
                DeviceMetric::ClockSm => Value::from(d.clock_info(Clock::SM)?),
                DeviceMetric::ClockMemory => Value::from(d.clock_info(Clock::Memory)?),
                DeviceMetric::ClockVideo => Value::from(d.clock_info(Clock::Video)?),
                DeviceMetric::PcieTx => Value::from(d.pcie_throughput(PcieUtilCounter::Send)?),
                DeviceMetric::PcieRx => Value::from(d.pcie_throughput(PcieUtilCounter::Receive)?),
                DeviceMetric::PcieLinkGen => Value::from(d.current_pcie_link_gen()?),
                DeviceMetric::PcieLinkWidth => Value::from(d.current_pcie_link_width()?),
                DeviceMetric::PcieReplayCounter => Value::from(d.pcie_replay_counter()?),
                DeviceMetric::PerformanceState => match d.performance_state()? {
                    PerformanceState::Unknown => Value::from("Unknown"),
                    state => Value::Text(format!("P{}", state.as_c())),
                },
                DeviceMetric::ClocksEventReasons => {
                    Value::from(d.current_throttle_reasons()?.bits())
                }
                DeviceMetric::ViolationPower => violation(&d, PerformancePolicy::Power)?,
                DeviceMetric::ViolationThermal => violation(&d, PerformancePolicy::Thermal)?,
                DeviceMetric::ViolationReliability => {
                    violation(&d, PerformancePolicy::Reliability)?
                }
                DeviceMetric::ViolationBoardLimit => violation(&d, PerformancePolicy::BoardLimit)?,
                DeviceMetric::ViolationLowUtil => {
                    violation(&d, PerformancePolicy::LowUtilization)?
                }
                DeviceMetric::ViolationSyncBoost => violation(&d, PerformancePolicy::SyncBoost)?,
                DeviceMetric::EccVolatileSbe => Value::from(
                    d.total_ecc_errors(MemoryError::Corrected, EccCounter::Volatile)?,
                ),
                DeviceMetric::EccVolatileDbe => Value::from(
                    d.total_ecc_errors(MemoryError::Uncorrected, EccCounter::Volatile)?,
                ),
                DeviceMetric::EccAggregateSbe => Value::from(
                    d.total_ecc_errors(MemoryError::Corrected, EccCounter::Aggregate)?,
                ),
                DeviceMetric::EccAggregateDbe => Value::from(
                    d.total_ecc_errors(MemoryError::Uncorrected, EccCounter::Aggregate)?,
                ),
                DeviceMetric::Name => Value::Text(d.name()?),
                DeviceMetric::Uuid => Value::Text(d.uuid()?),
                DeviceMetric::Serial => Value::Text(d.serial()?),
                DeviceMetric::Brand => Value::Text(format!("{:?}", d.brand()?)),
                DeviceMetric::Architecture => Value::Text(format!("{:?}", d.architecture()?)),
                DeviceMetric::VbiosVersion => Value::Text(d.vbios_version()?),
                DeviceMetric::PciBusId => Value::Text(d.pci_info()?.bus_id),
                DeviceMetric::PcieMaxLinkGen => Value::from(d.max_pcie_link_gen()?),
                DeviceMetric::PcieMaxLinkWidth => Value::from(d.max_pcie_link_width()?),
                DeviceMetric::MaxClockGraphics => Value::from(d.max_clock_info(Clock::Graphics)?),
                DeviceMetric::MaxClockSm => Value::from(d.max_clock_info(Clock::SM)?),
                DeviceMetric::MaxClockMemory => Value::from(d.max_clock_info(Clock::Memory)?),
                DeviceMetric::MaxClockVideo => Value::from(d.max_clock_info(Clock::Video)?),
                DeviceMetric::PowerDefaultLimit => {
                    Value::from(d.power_management_limit_default()?)
                }
                DeviceMetric::PowerMinLimit => {
                    Value::from(d.power_management_limit_constraints()?.min_limit)
                }
                DeviceMetric::PowerMaxLimit => {
                    Value::from(d.power_management_limit_constraints()?.max_limit)
                }
            };
            Ok(value)
        }

        fn compute_processes(&self, index: u32) -> Result<Vec<GpuProcess>, GpuError> {
            Ok(to_processes(self.device(index)?.running_compute_processes()?))
        }

        fn graphics_processes(&self, index: u32) -> Result<Vec<GpuProcess>, GpuError> {
            Ok(to_processes(self.device(index)?.running_graphics_processes()?))
        }

        fn process_utilization(&self, index: u32) -> Result<Vec<GpuProcessUtilization>, GpuError> {
            let samples = self.device(index)?.process_utilization_stats(0u64)?;
            Ok(samples
                .into_iter()
                .map(|s| GpuProcessUtilization {
                    pid: s.pid,
                    sm_util: s.sm_util,
                    mem_util: s.mem_util,
                })
                .collect())
        }
    }

    fn violation(d: &Device<'_>, policy: PerformancePolicy) -> Result<Value, GpuError> {
        Ok(Value::from(d.violation_status(policy)?.violation_time))
    }
}
