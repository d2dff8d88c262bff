//! Scriptable accelerator driver for testing the GPU collector.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collector::gpu::{DeviceMetric, GpuDriver, GpuError, GpuProcess, GpuProcessUtilization};
use crate::model::Value;

/// One fake device. Metrics missing from `metrics` report `NotSupported`.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub metrics: HashMap<DeviceMetric, Value>,
    pub compute: Vec<GpuProcess>,
    pub graphics: Vec<GpuProcess>,
    pub utilization: Vec<GpuProcessUtilization>,
}

impl MockDevice {
    /// A mid-load datacenter card with every metric supported.
    pub fn busy(index: u32) -> Self {
        let metrics = HashMap::from([
            (DeviceMetric::UtilizationGpu, Value::Int(87)),
            (DeviceMetric::UtilizationMemory, Value::Int(41)),
            (DeviceMetric::UtilizationEncoder, Value::Int(0)),
            (DeviceMetric::UtilizationDecoder, Value::Int(3)),
            (DeviceMetric::MemoryTotal, Value::Int(85_899_345_920)),
            (DeviceMetric::MemoryUsed, Value::Int(42_949_672_960)),
            (DeviceMetric::MemoryFree, Value::Int(42_949_672_960)),
            (DeviceMetric::Bar1Used, Value::Int(4_194_304)),
            (DeviceMetric::Bar1Free, Value::Int(130_023_424)),
            (DeviceMetric::Temperature, Value::Int(64)),
            (DeviceMetric::TemperatureMemory, Value::Int(71)),
            (DeviceMetric::FanSpeed, Value::Int(0)),
            (DeviceMetric::PowerDraw, Value::Int(312_500)),
            (DeviceMetric::PowerLimit, Value::Int(400_000)),
            (DeviceMetric::EnergyConsumption, Value::Int(918_273_645)),
            (DeviceMetric::ClockGraphics, Value::Int(1410)),
            (DeviceMetric::ClockSm, Value::Int(1410)),
            (DeviceMetric::ClockMemory, Value::Int(1593)),
            (DeviceMetric::ClockVideo, Value::Int(1275)),
            (DeviceMetric::PcieTx, Value::Int(12_000)),
            (DeviceMetric::PcieRx, Value::Int(34_000)),
            (DeviceMetric::PcieLinkGen, Value::Int(4)),
            (DeviceMetric::PcieLinkWidth, Value::Int(16)),
            (DeviceMetric::PcieReplayCounter, Value::Int(0)),
            (DeviceMetric::PerformanceState, Value::from("P0")),
            // SwPowerCap | HwSlowdown
            (DeviceMetric::ClocksEventReasons, Value::Int(0x00c)),
            (DeviceMetric::ViolationPower, Value::Int(2_500_000_000)),
            (DeviceMetric::ViolationThermal, Value::Int(0)),
            (DeviceMetric::ViolationReliability, Value::Int(0)),
            (DeviceMetric::ViolationBoardLimit, Value::Int(0)),
            (DeviceMetric::ViolationLowUtil, Value::Int(40_000_000_000)),
            (DeviceMetric::ViolationSyncBoost, Value::Int(0)),
            (DeviceMetric::EccVolatileSbe, Value::Int(2)),
            (DeviceMetric::EccVolatileDbe, Value::Int(0)),
            (DeviceMetric::EccAggregateSbe, Value::Int(15)),
            (DeviceMetric::EccAggregateDbe, Value::Int(0)),
            (DeviceMetric::Name, Value::from("NVIDIA A100-SXM4-80GB")),
            (
                DeviceMetric::Uuid,
                Value::Text(format!("GPU-0000000{}-aaaa-bbbb-cccc-dddddddddddd", index)),
            ),
            (
                DeviceMetric::PciBusId,
                Value::Text(format!("00000000:0{}:00.0", index + 7)),
            ),
            (
                DeviceMetric::Serial,
                Value::Text(format!("132302450{}", 1000 + index)),
            ),
            (DeviceMetric::Brand, Value::from("Nvidia")),
            (DeviceMetric::Architecture, Value::from("Ampere")),
            (DeviceMetric::VbiosVersion, Value::from("92.00.36.00.01")),
            (DeviceMetric::PcieMaxLinkGen, Value::Int(4)),
            (DeviceMetric::PcieMaxLinkWidth, Value::Int(16)),
            (DeviceMetric::MaxClockGraphics, Value::Int(1410)),
            (DeviceMetric::MaxClockSm, Value::Int(1410)),
            (DeviceMetric::MaxClockMemory, Value::Int(1593)),
            (DeviceMetric::MaxClockVideo, Value::Int(1290)),
            (DeviceMetric::PowerDefaultLimit, Value::Int(400_000)),
            (DeviceMetric::PowerMinLimit, Value::Int(100_000)),
            (DeviceMetric::PowerMaxLimit, Value::Int(400_000)),
        ]);
        Self {
            metrics,
            compute: Vec::new(),
            graphics: Vec::new(),
            utilization: Vec::new(),
        }
    }
}

/// Fake driver. Clones share counters, so a test can keep a handle while the
/// collector owns the boxed driver.
#[derive(Debug, Clone, Default)]
pub struct MockGpu {
    pub devices: Vec<MockDevice>,
    pub fail_init: bool,
    initialized: bool,
    init_calls: Arc<AtomicUsize>,
    shutdown_calls: Arc<AtomicUsize>,
}

impl MockGpu {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    /// A host where the driver library cannot be loaded.
    pub fn missing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    fn device(&self, index: u32) -> Result<&MockDevice, GpuError> {
        if !self.initialized {
            return Err(GpuError::NotInitialized);
        }
        self.devices
            .get(index as usize)
            .ok_or_else(|| GpuError::Driver(format!("invalid device index {}", index)))
    }
}

impl GpuDriver for MockGpu {
    fn init(&mut self) -> Result<(), GpuError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(GpuError::Unavailable("libnvidia-ml.so.1 not found".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), GpuError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if !self.initialized {
            return Err(GpuError::NotInitialized);
        }
        self.initialized = false;
        Ok(())
    }

    fn device_count(&self) -> Result<u32, GpuError> {
        if !self.initialized {
            return Err(GpuError::NotInitialized);
        }
        Ok(self.devices.len() as u32)
    }

    fn driver_version(&self) -> Result<String, GpuError> {
        if !self.initialized {
            return Err(GpuError::NotInitialized);
        }
        Ok("550.54.15".to_string())
    }

    fn cuda_version(&self) -> Result<String, GpuError> {
        if !self.initialized {
            return Err(GpuError::NotInitialized);
        }
        Ok("12.4".to_string())
    }

    fn metric(&self, index: u32, metric: DeviceMetric) -> Result<Value, GpuError> {
        self.device(index)?
            .metrics
            .get(&metric)
            .cloned()
            .ok_or(GpuError::NotSupported)
    }

    fn compute_processes(&self, index: u32) -> Result<Vec<GpuProcess>, GpuError> {
        Ok(self.device(index)?.compute.clone())
    }

    fn graphics_processes(&self, index: u32) -> Result<Vec<GpuProcess>, GpuError> {
        Ok(self.device(index)?.graphics.clone())
    }

    fn process_utilization(&self, index: u32) -> Result<Vec<GpuProcessUtilization>, GpuError> {
        Ok(self.device(index)?.utilization.clone())
    }
}
