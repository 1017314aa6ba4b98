//! Device descriptions and initialization options.
//!
//! A [`DeviceDescriptor`] is the immutable, driver-reported view of one
//! physical accelerator. It is created once per ordinal (see
//! [`crate::registry::DescriptorProvider`]) and shared read-only afterwards.
//!
//! [`DeviceOptions`] travel the other way: they are handed to the driver when
//! an execution context brings a device up, and they are part of the executor
//! cache key, so two contexts initialized with different options never alias.

use std::collections::BTreeMap;
use std::fmt;

use bon::bon;
use enumset::EnumSet;

/// Optional hardware features a device may report.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(enumset::EnumSetType, strum::Display)]
pub enum Capability {
    /// Native half-precision arithmetic.
    Fp16,
    /// Native bfloat16 arithmetic.
    Bf16,
    /// Native double-precision arithmetic.
    Fp64,
    /// Packed int8 dot-product instructions.
    Int8DotProduct,
    /// Host and device share an address space.
    UnifiedMemory,
    SubgroupShuffle,
}

/// Immutable description of one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub ordinal: usize,
    pub name: String,
    /// NUMA / bus affinity node reported by the driver. May be negative when
    /// the platform does not expose affinity information.
    pub numa_node: i32,
    pub capabilities: EnumSet<Capability>,
    /// Device memory in bytes.
    pub memory_size: u64,
    pub max_work_group_size: u32,
    pub compute_units: u32,
}

impl DeviceDescriptor {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ordinal {}, numa node {}, {} MiB)",
            self.name,
            self.ordinal,
            self.numa_node,
            self.memory_size / (1024 * 1024)
        )
    }
}

/// Options a device is initialized with.
///
/// The flag bits mirror the scheduling hints stream executors traditionally
/// accept; at most one `SCHEDULE_*` bit may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceOptions {
    pub flags: u32,
    /// Driver-specific key/value settings, passed through untouched.
    pub non_portable_tags: BTreeMap<String, String>,
}

impl DeviceOptions {
    pub const DO_NOT_RECLAIM_STACK_ALLOCATION: u32 = 0x1;
    pub const SCHEDULE_SPIN: u32 = 0x02;
    pub const SCHEDULE_YIELD: u32 = 0x04;
    pub const SCHEDULE_BLOCKING_SYNC: u32 = 0x08;
    pub const SCHEDULE_MASK: u32 = 0x0e;

    pub fn schedule_flags(&self) -> u32 {
        self.flags & Self::SCHEDULE_MASK
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.non_portable_tags.get(key).map(String::as_str)
    }
}

#[bon]
impl DeviceOptions {
    #[builder]
    pub fn new(
        #[builder(default)] flags: u32,
        #[builder(default)] non_portable_tags: BTreeMap<String, String>,
    ) -> Self {
        Self { flags, non_portable_tags }
    }
}
