//! Host-simulated accelerator driver.
//!
//! `HostDriver` presents a fixed set of devices backed by host memory. Each
//! device is described by a [`HostDeviceConfig`]; the device set can be
//! selected through the environment:
//!
//! - `XPU_HOST_DEVICES`: comma-separated NUMA node ids, one device per entry
//!   (`"0,0,1"` is three devices, two on node 0 and one on node 1). An empty
//!   value means no devices.
//!
//! The driver also counts the calls made into it, which lets callers observe
//! how often descriptors were queried and devices were initialized.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bon::bon;
use enumset::EnumSet;
use snafu::ensure;

use crate::allocator::DeviceMemory;
use crate::device::{Capability, DeviceDescriptor, DeviceOptions};
use crate::driver::Driver;
use crate::error::{AllocationFailedSnafu, DriverSnafu, InvalidDeviceListSnafu, Result};

/// Environment variable selecting the simulated device set.
pub const HOST_DEVICES_ENV: &str = "XPU_HOST_DEVICES";

const DEFAULT_MEMORY_SIZE: u64 = 1 << 30;

/// Configuration of one simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDeviceConfig {
    pub numa_node: i32,
    pub memory_size: u64,
    pub capabilities: EnumSet<Capability>,
    pub compute_units: u32,
    pub max_work_group_size: u32,
    /// Number of initialization attempts that fail before one succeeds.
    pub init_failures: usize,
}

#[bon]
impl HostDeviceConfig {
    #[builder]
    pub fn new(
        #[builder(default)] numa_node: i32,
        #[builder(default = DEFAULT_MEMORY_SIZE)] memory_size: u64,
        #[builder(default = Capability::Fp16 | Capability::Fp64 | Capability::UnifiedMemory)] capabilities: EnumSet<
            Capability,
        >,
        #[builder(default = 8)] compute_units: u32,
        #[builder(default = 256)] max_work_group_size: u32,
        #[builder(default)] init_failures: usize,
    ) -> Self {
        Self { numa_node, memory_size, capabilities, compute_units, max_work_group_size, init_failures }
    }
}

#[derive(Debug)]
struct HostDevice {
    config: HostDeviceConfig,
    init_failures_left: AtomicUsize,
    init_calls: AtomicUsize,
    descriptor_queries: AtomicUsize,
    allocated: AtomicU64,
}

impl HostDevice {
    fn new(config: HostDeviceConfig) -> Self {
        let init_failures_left = AtomicUsize::new(config.init_failures);
        Self {
            config,
            init_failures_left,
            init_calls: AtomicUsize::new(0),
            descriptor_queries: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
        }
    }
}

#[derive(Debug)]
pub struct HostDriver {
    devices: Vec<HostDevice>,
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::with_numa_nodes(&[0])
    }
}

impl HostDriver {
    pub fn new(configs: impl IntoIterator<Item = HostDeviceConfig>) -> Self {
        Self { devices: configs.into_iter().map(HostDevice::new).collect() }
    }

    /// One default-configured device per entry of `numa_nodes`.
    pub fn with_numa_nodes(numa_nodes: &[i32]) -> Self {
        Self::new(numa_nodes.iter().map(|&numa_node| HostDeviceConfig::builder().numa_node(numa_node).build()))
    }

    /// Parse a device set in `XPU_HOST_DEVICES` syntax.
    pub fn parse_device_list(list: &str) -> Result<Self> {
        if list.trim().is_empty() {
            return Ok(Self::new(Vec::new()));
        }

        let mut numa_nodes = Vec::new();
        for entry in list.split(',') {
            let entry = entry.trim();
            let numa_node = entry.parse::<i32>().map_err(|e| {
                InvalidDeviceListSnafu { list: list.to_string(), reason: format!("'{entry}': {e}") }.build()
            })?;
            numa_nodes.push(numa_node);
        }
        Ok(Self::with_numa_nodes(&numa_nodes))
    }

    /// Device set from `XPU_HOST_DEVICES`, or a single device on node 0.
    pub fn from_env() -> Result<Self> {
        match std::env::var(HOST_DEVICES_ENV) {
            Ok(list) => Self::parse_device_list(&list),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Number of `initialize` calls made for `ordinal`.
    pub fn initialize_calls(&self, ordinal: usize) -> usize {
        self.devices.get(ordinal).map_or(0, |d| d.init_calls.load(Ordering::Acquire))
    }

    /// Number of `query_descriptor` calls made for `ordinal`.
    pub fn descriptor_queries(&self, ordinal: usize) -> usize {
        self.devices.get(ordinal).map_or(0, |d| d.descriptor_queries.load(Ordering::Acquire))
    }

    /// Total bytes ever allocated on `ordinal`.
    pub fn allocated_bytes(&self, ordinal: usize) -> u64 {
        self.devices.get(ordinal).map_or(0, |d| d.allocated.load(Ordering::Acquire))
    }

    fn device(&self, ordinal: usize, operation: &'static str) -> Result<&HostDevice> {
        self.devices.get(ordinal).ok_or_else(|| {
            DriverSnafu { ordinal, operation, reason: format!("no such device ({} present)", self.devices.len()) }
                .build()
        })
    }
}

impl Driver for HostDriver {
    fn name(&self) -> &str {
        "host"
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn query_descriptor(&self, ordinal: usize) -> Result<DeviceDescriptor> {
        let device = self.device(ordinal, "query_descriptor")?;
        device.descriptor_queries.fetch_add(1, Ordering::AcqRel);

        let config = &device.config;
        Ok(DeviceDescriptor {
            ordinal,
            name: format!("Host XPU {ordinal}"),
            numa_node: config.numa_node,
            capabilities: config.capabilities,
            memory_size: config.memory_size,
            max_work_group_size: config.max_work_group_size,
            compute_units: config.compute_units,
        })
    }

    fn initialize(&self, ordinal: usize, options: &DeviceOptions) -> Result<()> {
        let device = self.device(ordinal, "initialize")?;
        device.init_calls.fetch_add(1, Ordering::AcqRel);

        let schedule = options.schedule_flags();
        ensure!(
            schedule.count_ones() <= 1,
            DriverSnafu {
                ordinal,
                operation: "initialize",
                reason: format!("conflicting schedule flags {schedule:#x}"),
            }
        );

        let failed = device
            .init_failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        ensure!(!failed, DriverSnafu { ordinal, operation: "initialize", reason: "device not responding" });

        tracing::debug!(device.ordinal = ordinal, flags = options.flags, "host device initialized");
        Ok(())
    }

    fn allocate(&self, ordinal: usize, size: usize) -> Result<DeviceMemory> {
        let device = self.device(ordinal, "allocate")?;
        let limit = device.config.memory_size;

        ensure!(
            size as u64 <= limit,
            AllocationFailedSnafu { ordinal, size, reason: format!("exceeds device memory of {limit} bytes") }
        );

        device.allocated.fetch_add(size as u64, Ordering::AcqRel);
        Ok(DeviceMemory::zeroed(ordinal, size))
    }
}
