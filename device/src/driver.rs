use crate::allocator::DeviceMemory;
use crate::device::{DeviceDescriptor, DeviceOptions};
use crate::error::Result;

/// The low-level driver call surface.
///
/// Implementations must be callable from many threads at once. Every error a
/// driver returns should already name the ordinal and the failing operation
/// (see [`crate::Error::Driver`]).
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// Driver name (for logs).
    fn name(&self) -> &str;

    /// Number of devices visible to this process. Zero is a valid answer.
    fn device_count(&self) -> usize;

    /// Query the device descriptor for `ordinal`.
    ///
    /// Callers validate the ordinal range; drivers may assume it is in range.
    fn query_descriptor(&self, ordinal: usize) -> Result<DeviceDescriptor>;

    /// Bring device `ordinal` up with `options`.
    fn initialize(&self, ordinal: usize, options: &DeviceOptions) -> Result<()>;

    /// Allocate `size` bytes of device memory on `ordinal`.
    fn allocate(&self, ordinal: usize, size: usize) -> Result<DeviceMemory>;
}
