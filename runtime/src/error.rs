//! Error types for the platform layer.

use snafu::Snafu;

use crate::status::StatusCode;

/// Result type for platform operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the platform, executor cache and dispatcher.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Unknown device, bus, platform or stream-bound executor.
    #[snafu(display("not found: {message}"))]
    NotFound { message: String },

    /// Caller passed arguments the operation cannot accept.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument { message: String },

    /// Arguments are well-formed but the surrounding state does not allow the call.
    #[snafu(display("failed precondition: {message}"))]
    FailedPrecondition { message: String },

    /// Device initialization failed.
    #[snafu(display("failed initializing executor for device ordinal {ordinal}: {source}"))]
    Internal { ordinal: usize, source: xpu_device::Error },

    /// The primitives library does not support the requested configuration.
    #[snafu(display("unimplemented: {message}"))]
    Unimplemented { message: String },

    /// Scratch or device memory ran out.
    #[snafu(display("resource exhausted: {source}"))]
    ResourceExhausted { source: xpu_device::Error },

    #[snafu(display("already exists: {message}"))]
    AlreadyExists { message: String },

    /// Any other driver-level failure.
    #[snafu(display("device error: {source}"))]
    Device { source: xpu_device::Error },
}

impl Error {
    /// Status code reported across the host runtime boundary.
    pub fn code(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NotFound,
            Error::InvalidArgument { .. } => StatusCode::InvalidArgument,
            Error::FailedPrecondition { .. } => StatusCode::FailedPrecondition,
            Error::Internal { .. } => StatusCode::Internal,
            Error::Unimplemented { .. } => StatusCode::Unimplemented,
            Error::ResourceExhausted { .. } => StatusCode::ResourceExhausted,
            Error::AlreadyExists { .. } => StatusCode::AlreadyExists,
            Error::Device { source } => match source {
                xpu_device::Error::OrdinalOutOfRange { .. } => StatusCode::NotFound,
                xpu_device::Error::SizeMismatch { .. } | xpu_device::Error::ShapeOverflow { .. } => {
                    StatusCode::InvalidArgument
                }
                xpu_device::Error::ScratchExhausted { .. } | xpu_device::Error::AllocationFailed { .. } => {
                    StatusCode::ResourceExhausted
                }
                _ => StatusCode::Internal,
            },
        }
    }
}
