//! XPU platform plugin.
//!
//! Exposes accelerator devices to a host ML runtime through a
//! stream-executor style surface:
//!
//! - [`Platform`] / [`XpuPlatform`]: device enumeration, bus topology
//!   inferred from NUMA nodes, cached executors
//! - [`ExecutorCache`]: single-flight get-or-create keyed by
//!   [`ExecutorConfig`]
//! - [`Executor`]: an initialized, device-bound execution context
//! - [`dispatch`]: convolution dispatch against a [`PrimitiveLibrary`]
//! - [`PlatformRegistry`] and [`initialize_xpu_platform`]: how the host
//!   runtime finds the platform
//!
//! # Topology
//!
//! Bus topology is computed on first use by [`Platform::bus_count`] or
//! [`Platform::first_executor_for_bus`], which creates an executor for every
//! visible device. [`Platform::device_to_bus`] does not trigger that scan.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod executor_cache;
pub mod platform;
pub mod platform_registry;
pub mod status;
pub mod topology;


pub use config::ExecutorConfig;
pub use dispatch::{
    ActivationMode, ConvCall, ConvKind, ConvParams, Dictionary, HostPrimitives, ParamValue, PrimitiveLibrary,
};
pub use error::*;
pub use executor::Executor;
pub use executor_cache::ExecutorCache;
pub use platform::{Platform, PlatformId, XPU_PLATFORM_ID, XpuPlatform};
pub use platform_registry::{
    PLATFORMS, PlatformRegistry, initialize_host_platform, initialize_xpu_platform, register_xpu_platform,
    xpu_platform,
};
pub use status::{Status, StatusCode};
pub use topology::{BusTopology, TopologyState};
