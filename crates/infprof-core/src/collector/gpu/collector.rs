//! GPU collector with an idempotent, lazily initialised driver handle.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::driver::{DeviceMetric, GpuDriver, GpuProcess};
use crate::collector::probe::{probe, read_string};
use crate::collector::traits::{FileSystem, MetricCollector};
use crate::model::{Fields, FieldsExt, Reading, Value};

/// Lifecycle of the driver handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Ready,
    /// Initialisation failed; stays latched until `cleanup`.
    Unavailable,
}

/// Plain per-device metrics: output name and driver query.
const DEVICE_FIELDS: &[(&str, DeviceMetric)] = &[
    ("utilizationGpu", DeviceMetric::UtilizationGpu),
    ("utilizationMemory", DeviceMetric::UtilizationMemory),
    ("utilizationEncoder", DeviceMetric::UtilizationEncoder),
    ("utilizationDecoder", DeviceMetric::UtilizationDecoder),
    ("memoryTotalBytes", DeviceMetric::MemoryTotal),
    ("memoryUsedBytes", DeviceMetric::MemoryUsed),
    ("memoryFreeBytes", DeviceMetric::MemoryFree),
    ("bar1UsedBytes", DeviceMetric::Bar1Used),
    ("bar1FreeBytes", DeviceMetric::Bar1Free),
    ("temperatureGpuC", DeviceMetric::Temperature),
    ("temperatureMemoryC", DeviceMetric::TemperatureMemory),
    ("fanSpeedPercent", DeviceMetric::FanSpeed),
    ("energyConsumptionMj", DeviceMetric::EnergyConsumption),
    ("clockGraphicsMhz", DeviceMetric::ClockGraphics),
    ("clockSmMhz", DeviceMetric::ClockSm),
    ("clockMemoryMhz", DeviceMetric::ClockMemory),
    ("clockVideoMhz", DeviceMetric::ClockVideo),
    ("pcieTxKBps", DeviceMetric::PcieTx),
    ("pcieRxKBps", DeviceMetric::PcieRx),
    ("pcieCurrentLinkGen", DeviceMetric::PcieLinkGen),
    ("pcieCurrentLinkWidth", DeviceMetric::PcieLinkWidth),
    ("pcieReplayCounter", DeviceMetric::PcieReplayCounter),
    ("performanceState", DeviceMetric::PerformanceState),
    ("violationPowerNs", DeviceMetric::ViolationPower),
    ("violationThermalNs", DeviceMetric::ViolationThermal),
    ("violationReliabilityNs", DeviceMetric::ViolationReliability),
    ("violationBoardLimitNs", DeviceMetric::ViolationBoardLimit),
    ("violationLowUtilNs", DeviceMetric::ViolationLowUtil),
    ("violationSyncBoostNs", DeviceMetric::ViolationSyncBoost),
    ("eccVolatileSbe", DeviceMetric::EccVolatileSbe),
    ("eccVolatileDbe", DeviceMetric::EccVolatileDbe),
    ("eccAggregateSbe", DeviceMetric::EccAggregateSbe),
    ("eccAggregateDbe", DeviceMetric::EccAggregateDbe),
];

/// Clock event reason bits and their names, lowest bit first.
const THROTTLE_REASONS: &[(u64, &str)] = &[
    (0x001, "GpuIdle"),
    (0x002, "AppClocksSetting"),
    (0x004, "SwPowerCap"),
    (0x008, "HwSlowdown"),
    (0x010, "SyncBoost"),
    (0x020, "SwThermalSlowdown"),
    (0x040, "HwThermalSlowdown"),
    (0x080, "HwPowerBrakeSlowdown"),
    (0x100, "DisplayClockSetting"),
];

/// Power metrics reported by the driver in milliwatts.
const POWER_FIELDS: &[(&str, DeviceMetric)] = &[
    ("powerDrawW", DeviceMetric::PowerDraw),
    ("powerLimitW", DeviceMetric::PowerLimit),
];

const IDENTITY_FIELDS: &[(&str, DeviceMetric)] = &[
    ("name", DeviceMetric::Name),
    ("uuid", DeviceMetric::Uuid),
    ("serial", DeviceMetric::Serial),
    ("brand", DeviceMetric::Brand),
    ("architecture", DeviceMetric::Architecture),
    ("vbiosVersion", DeviceMetric::VbiosVersion),
    ("memoryTotalBytes", DeviceMetric::MemoryTotal),
    ("pciBusId", DeviceMetric::PciBusId),
    ("pcieMaxLinkGen", DeviceMetric::PcieMaxLinkGen),
    ("pcieMaxLinkWidth", DeviceMetric::PcieMaxLinkWidth),
    ("maxClockGraphicsMhz", DeviceMetric::MaxClockGraphics),
    ("maxClockSmMhz", DeviceMetric::MaxClockSm),
    ("maxClockMemoryMhz", DeviceMetric::MaxClockMemory),
    ("maxClockVideoMhz", DeviceMetric::MaxClockVideo),
    ("powerDefaultLimitMw", DeviceMetric::PowerDefaultLimit),
    ("powerMinLimitMw", DeviceMetric::PowerMinLimit),
    ("powerMaxLimitMw", DeviceMetric::PowerMaxLimit),
];

fn default_for(metric: DeviceMetric) -> Value {
    match metric {
        DeviceMetric::PerformanceState => Value::from("Unknown"),
        m if m.is_text() => Value::from(""),
        _ => Value::Int(0),
    }
}

/// Names of the reasons set in a clock event bitmask, comma separated.
pub fn decode_throttle_reasons(mask: u64) -> String {
    THROTTLE_REASONS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

/// Milliwatts to watts; missing or non-positive readings become 0.
fn milliwatts_to_watts(value: &Value) -> f64 {
    match value.as_f64() {
        Some(mw) if mw > 0.0 => mw / 1000.0,
        _ => 0.0,
    }
}

pub struct GpuCollector<F: FileSystem> {
    driver: Option<Box<dyn GpuDriver>>,
    state: DriverState,
    fs: F,
    proc_path: PathBuf,
    static_cache: Option<Fields>,
    include_processes: bool,
}

impl<F: FileSystem> GpuCollector<F> {
    /// `driver = None` builds a collector that always reports nothing
    /// (e.g. compiled without NVML support).
    pub fn new(driver: Option<Box<dyn GpuDriver>>, fs: F, proc_path: impl AsRef<Path>) -> Self {
        Self {
            driver,
            state: DriverState::Uninitialized,
            fs,
            proc_path: proc_path.as_ref().to_path_buf(),
            static_cache: None,
            include_processes: true,
        }
    }

    /// Turns per-device process enumeration on or off. On by default.
    pub fn with_processes(mut self, enabled: bool) -> Self {
        self.include_processes = enabled;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Initialises the driver once. Returns whether it is usable.
    pub fn init(&mut self) -> bool {
        if self.state != DriverState::Uninitialized {
            return self.state == DriverState::Ready;
        }
        let Some(driver) = self.driver.as_mut() else {
            self.state = DriverState::Unavailable;
            return false;
        };
        match driver.init() {
            Ok(()) => {
                info!("GPU driver initialized");
                self.state = DriverState::Ready;
                true
            }
            Err(e) => {
                debug!("GPU collection disabled: {}", e);
                self.state = DriverState::Unavailable;
                false
            }
        }
    }

    fn ready_driver(&mut self) -> Option<&dyn GpuDriver> {
        if self.init() {
            self.driver.as_deref()
        } else {
            None
        }
    }

    fn process_name(&self, pid: u32) -> String {
        let (comm, _) = read_string(&self.fs, &self.proc_path.join(pid.to_string()).join("comm"));
        match comm.trim() {
            "" => "unknown".to_string(),
            name => name.to_string(),
        }
    }

    fn collect_device(&self, driver: &dyn GpuDriver, index: u32) -> Fields {
        let mut f = Fields::new();
        f.put_plain("index", index);

        for &(name, metric) in DEVICE_FIELDS {
            let (value, ts) = probe(default_for(metric), || driver.metric(index, metric));
            f.put(name, value, ts);
        }
        for &(name, metric) in POWER_FIELDS {
            let (value, ts) = probe(Value::Int(0), || driver.metric(index, metric));
            f.put(name, milliwatts_to_watts(&value), ts);
        }

        let (reasons, t_reasons) = probe(Value::Int(0), || {
            driver.metric(index, DeviceMetric::ClocksEventReasons)
        });
        let mask = reasons.as_i64().map_or(0, |m| m as u64);
        f.put("clocksEventReasons", reasons, t_reasons);
        f.put("throttleReasonsActive", decode_throttle_reasons(mask), t_reasons);

        if !self.include_processes {
            return f;
        }
        let (compute, t_procs) = probe(Vec::new(), || driver.compute_processes(index));
        let (graphics, _) = probe(Vec::new(), || driver.graphics_processes(index));
        let (utilization, _) = probe(Vec::new(), || driver.process_utilization(index));
        let processes = merge_processes(compute, graphics);

        f.put("processCount", processes.len(), t_procs);
        let entries = processes
            .into_iter()
            .map(|p| {
                let mut pf = Fields::new();
                pf.put("pid", p.pid, t_procs);
                pf.put("name", self.process_name(p.pid), t_procs);
                pf.put("usedMemoryBytes", p.used_memory.unwrap_or(0), t_procs);
                let util = utilization.iter().find(|u| u.pid == p.pid);
                pf.put("smUtil", util.map_or(0, |u| u.sm_util), t_procs);
                pf.put("memUtil", util.map_or(0, |u| u.mem_util), t_procs);
                Reading::Mapping(pf)
            })
            .collect();
        f.insert("processes".to_string(), Reading::Sequence(entries));
        f
    }
}

/// Merges compute and graphics process lists, keeping one entry per pid.
fn merge_processes(compute: Vec<GpuProcess>, graphics: Vec<GpuProcess>) -> Vec<GpuProcess> {
    let mut merged: Vec<GpuProcess> = Vec::new();
    for p in compute.into_iter().chain(graphics) {
        match merged.iter_mut().find(|m| m.pid == p.pid) {
            Some(existing) => {
                if existing.used_memory.is_none() {
                    existing.used_memory = p.used_memory;
                }
            }
            None => merged.push(p),
        }
    }
    merged
}

impl<F: FileSystem> MetricCollector for GpuCollector<F> {
    fn name(&self) -> &'static str {
        "nvidia"
    }

    fn collect(&mut self) -> Reading {
        if !self.init() {
            return Reading::empty();
        }
        let Some(driver) = self.driver.as_deref() else {
            return Reading::empty();
        };

        let (count, _) = probe(0, || driver.device_count());
        Reading::Sequence(
            (0..count)
                .map(|i| Reading::Mapping(self.collect_device(driver, i)))
                .collect(),
        )
    }

    fn static_info(&mut self) -> Fields {
        if let Some(cached) = &self.static_cache {
            return cached.clone();
        }
        let Some(driver) = self.ready_driver() else {
            return Fields::new();
        };

        let mut fields = Fields::new();
        let (driver_version, _) = probe(String::new(), || driver.driver_version());
        let (cuda_version, _) = probe(String::new(), || driver.cuda_version());
        let (count, _) = probe(0, || driver.device_count());
        fields.put_plain("driverVersion", driver_version);
        fields.put_plain("cudaVersion", cuda_version);
        fields.put_plain("gpuCount", count);

        let devices = (0..count)
            .map(|index| {
                let mut d = Fields::new();
                d.put_plain("index", index);
                for &(name, metric) in IDENTITY_FIELDS {
                    let (value, _) = probe(default_for(metric), || driver.metric(index, metric));
                    d.put_plain(name, value);
                }
                Reading::Mapping(d)
            })
            .collect();
        fields.insert("devices".to_string(), Reading::Sequence(devices));

        self.static_cache = Some(fields.clone());
        fields
    }

    fn cleanup(&mut self) {
        if self.state == DriverState::Ready
            && let Some(driver) = self.driver.as_mut()
            && let Err(e) = driver.shutdown()
        {
            debug!("GPU driver shutdown: {}", e);
        }
        self.state = DriverState::Uninitialized;
    }
}
