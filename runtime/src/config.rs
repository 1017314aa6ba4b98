use std::fmt;

use bon::bon;
use xpu_device::{DeviceOptions, StreamHandle};

/// Executor cache key.
///
/// A configuration that carries a `stream` asks for the executor attached to
/// that host runtime stream; such executors are only ever looked up, never
/// created on demand (see [`crate::Platform::get_executor`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutorConfig {
    pub ordinal: usize,
    pub device_options: DeviceOptions,
    pub stream: Option<StreamHandle>,
}

#[bon]
impl ExecutorConfig {
    #[builder]
    pub fn new(
        ordinal: usize,
        #[builder(default)] device_options: DeviceOptions,
        stream: Option<StreamHandle>,
    ) -> Self {
        Self { ordinal, device_options, stream }
    }

    /// Default configuration for `ordinal`.
    pub fn for_device(ordinal: usize) -> Self {
        Self { ordinal, device_options: DeviceOptions::default(), stream: None }
    }

    pub fn with_options(mut self, device_options: DeviceOptions) -> Self {
        self.device_options = device_options;
        self
    }

    pub fn with_stream(mut self, stream: StreamHandle) -> Self {
        self.stream = Some(stream);
        self
    }
}

impl fmt::Display for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}", self.ordinal)?;
        if self.device_options.flags != 0 {
            write!(f, " flags {:#x}", self.device_options.flags)?;
        }
        if let Some(stream) = self.stream {
            write!(f, " stream {stream}")?;
        }
        Ok(())
    }
}
