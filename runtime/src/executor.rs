//! Execution contexts.
//!
//! An [`Executor`] is the live, device-bound object through which work is
//! issued to one accelerator. It is created already initialized: the driver
//! has brought the device up with the configuration's options and the device
//! descriptor has been read. Executors are owned by the platform's executor
//! cache and handed out as `Arc<Executor>`; nothing outside the platform
//! destroys one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snafu::ensure;
use xpu_device::{
    BufferDescriptor, DescriptorProvider, DeviceDescriptor, Driver, OutputBuffer, ScratchAllocator, Stream,
    StreamScratchAllocator,
};

use crate::config::ExecutorConfig;
use crate::dispatch::{self, ConvKind, Dictionary, PrimitiveLibrary};
use crate::error::{FailedPreconditionSnafu, Result};

pub struct Executor {
    config: ExecutorConfig,
    descriptor: Arc<DeviceDescriptor>,
    driver: Arc<dyn Driver>,
    library: Arc<dyn PrimitiveLibrary>,
    default_stream: Arc<Stream>,
    dispatches: AtomicU64,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("device", &self.descriptor.name)
            .field("library", &self.library.name())
            .field("dispatches", &self.dispatches.load(Ordering::Relaxed))
            .finish()
    }
}

impl Executor {
    /// Bring up the device named by `config` and wrap it.
    ///
    /// When `config` carries a host runtime stream, the executor's default
    /// stream wraps that handle.
    pub(crate) fn initialize(
        config: ExecutorConfig,
        descriptors: &DescriptorProvider,
        library: Arc<dyn PrimitiveLibrary>,
    ) -> xpu_device::Result<Self> {
        let ordinal = config.ordinal;
        let driver = Arc::clone(descriptors.driver());

        driver.initialize(ordinal, &config.device_options)?;
        let descriptor = descriptors.descriptor_for(ordinal)?;

        let default_stream = Arc::new(match config.stream {
            Some(handle) => Stream::wrap(ordinal, handle),
            None => Stream::new(ordinal),
        });

        tracing::debug!(
            device.ordinal = ordinal,
            device.name = %descriptor.name,
            device.numa_node = descriptor.numa_node,
            stream = %default_stream.id(),
            "executor initialized"
        );

        Ok(Self { config, descriptor, driver, library, default_stream, dispatches: AtomicU64::new(0) })
    }

    pub fn ordinal(&self) -> usize {
        self.config.ordinal
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn default_stream(&self) -> &Arc<Stream> {
        &self.default_stream
    }

    pub fn library(&self) -> &Arc<dyn PrimitiveLibrary> {
        &self.library
    }

    /// Create an additional stream on this executor's device.
    pub fn create_stream(&self) -> Arc<Stream> {
        Arc::new(Stream::new(self.ordinal()))
    }

    /// Scratch allocator bound to `stream`, limited to `limit` bytes.
    pub fn scratch_allocator(&self, stream: &Stream, limit: usize) -> StreamScratchAllocator {
        StreamScratchAllocator::new(Arc::clone(&self.driver), stream, limit)
    }

    /// Number of dispatch calls issued through this executor.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Run one convolution primitive on `stream`.
    ///
    /// `stream` must belong to this executor's device. See
    /// [`dispatch::run_convolution`] for the argument contract.
    pub fn run_convolution(
        &self,
        stream: &Stream,
        params: &Dictionary,
        inputs: &[BufferDescriptor<'_>],
        output: &mut OutputBuffer<'_>,
        scratch: &dyn ScratchAllocator,
        kind: ConvKind,
    ) -> Result<()> {
        ensure!(
            stream.ordinal() == self.ordinal(),
            FailedPreconditionSnafu {
                message: format!(
                    "{} belongs to device {}, executor is bound to device {}",
                    stream.id(),
                    stream.ordinal(),
                    self.ordinal()
                )
            }
        );

        self.dispatches.fetch_add(1, Ordering::Relaxed);
        dispatch::run_convolution(self.library.as_ref(), stream, params, inputs, output, scratch, kind)
    }
}
