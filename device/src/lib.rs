//! Driver boundary for XPU accelerators.
//!
//! This crate is everything the platform layer needs from a device driver:
//!
//! - [`Driver`]: enumerate devices, query descriptors, initialize devices,
//!   allocate device memory
//! - [`DescriptorProvider`]: memoized per-ordinal [`DeviceDescriptor`]s
//! - [`Stream`] and [`TimelineSignal`]: ordered device work
//! - [`ScratchAllocator`]: per-call temporary memory bound to a stream
//! - [`BufferDescriptor`] / [`OutputBuffer`]: borrowed operand and result views
//!
//! [`HostDriver`] simulates a configurable device set in host memory.

pub mod allocator;
pub mod buffer;
pub mod device;
pub mod driver;
pub mod dtype;
pub mod error;
pub mod host;
pub mod queue;
pub mod registry;
pub mod sync;


pub use allocator::{DeviceMemory, ScratchAllocator, StreamScratchAllocator};
pub use buffer::{BufferDescriptor, Dims, OutputBuffer};
pub use device::{Capability, DeviceDescriptor, DeviceOptions};
pub use driver::Driver;
pub use dtype::ElementType;
pub use error::{Error, Result};
pub use host::{HOST_DEVICES_ENV, HostDeviceConfig, HostDriver};
pub use queue::{Stream, StreamHandle, StreamId};
pub use registry::DescriptorProvider;
pub use sync::{HostTimelineSignal, TimelineSignal};
