use snafu::Snafu;

use crate::dtype::ElementType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Device ordinal is not one of the visible devices.
    #[snafu(display("device ordinal {ordinal} out of range: {count} visible devices"))]
    OrdinalOutOfRange { ordinal: usize, count: usize },

    /// A driver call failed.
    #[snafu(display("driver {operation} failed on device {ordinal}: {reason}"))]
    Driver { ordinal: usize, operation: &'static str, reason: String },

    /// Device memory allocation failed.
    #[snafu(display("allocation of {size} bytes failed on device {ordinal}: {reason}"))]
    AllocationFailed { ordinal: usize, size: usize, reason: String },

    /// Scratch allocator ran over its byte budget.
    #[snafu(display("scratch allocation of {requested} bytes exceeds limit: {in_use} of {limit} bytes in use"))]
    ScratchExhausted { requested: usize, in_use: usize, limit: usize },

    #[snafu(display("timeline signal timeout: waited {timeout_ms}ms for value {target}, current {current}"))]
    SignalTimeout { timeout_ms: u64, target: u64, current: u64 },

    /// Malformed `XPU_HOST_DEVICES` value.
    #[snafu(display("invalid host device list '{list}': {reason}"))]
    InvalidDeviceList { list: String, reason: String },

    /// Byte size of a buffer shape does not fit in `usize`.
    #[snafu(display("{element_type} buffer of dims {dims:?} overflows the address space"))]
    ShapeOverflow { element_type: ElementType, dims: Vec<usize> },

    #[snafu(display("size mismatch: expected {expected}, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },
}
