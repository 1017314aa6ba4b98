//! Accelerator platforms.
//!
//! A [`Platform`] is the entry point a host runtime uses to reach one kind of
//! accelerator: it counts devices, describes them, groups them into buses and
//! hands out cached [`Executor`]s. [`XpuPlatform`] is the implementation for
//! devices behind a [`Driver`].

use std::fmt;
use std::sync::Arc;

use snafu::{ResultExt, ensure};
use xpu_device::{
    BufferDescriptor, DescriptorProvider, DeviceDescriptor, Driver, OutputBuffer, ScratchAllocator, Stream,
};

use crate::config::ExecutorConfig;
use crate::dispatch::{ConvKind, Dictionary, PrimitiveLibrary};
use crate::error::{
    DeviceSnafu, InternalSnafu, InvalidArgumentSnafu, NotFoundSnafu, Result, UnimplementedSnafu,
};
use crate::executor::Executor;
use crate::executor_cache::ExecutorCache;
use crate::status::Status;
use crate::topology::{BusTopology, TopologyState};

/// Stable identifier a platform is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformId(&'static str);

impl PlatformId {
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub const XPU_PLATFORM_ID: PlatformId = PlatformId::new("xpu");

pub trait Platform: Send + Sync + fmt::Debug {
    fn id(&self) -> PlatformId;

    fn name(&self) -> &str;

    /// Number of devices the driver exposes. Zero is not an error.
    fn visible_device_count(&self) -> usize;

    /// Descriptor of `ordinal`, without creating an executor for it.
    fn description_for_device(&self, ordinal: usize) -> Result<Arc<DeviceDescriptor>>;

    /// Number of buses spanned by the visible devices.
    ///
    /// Inspects the topology first, which creates an executor for every
    /// visible device.
    fn bus_count(&self) -> Result<usize>;

    /// Bus id of `ordinal`.
    ///
    /// Does not inspect the topology. Before the first inspection the bus id
    /// is the raw NUMA node; callers that need normalized ids go through
    /// [`Platform::bus_count`] or [`Platform::first_executor_for_bus`] first.
    fn device_to_bus(&self, ordinal: usize) -> Result<i64>;

    /// Executor of the lowest ordinal on `bus`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `bus >= bus_count()`; `NotFound` if no device
    /// sits on `bus`.
    fn first_executor_for_bus(&self, bus: usize) -> Result<Arc<Executor>>;

    /// Executor for `ordinal` with default options.
    fn executor_for_device(&self, ordinal: usize) -> Result<Arc<Executor>> {
        self.get_executor(&ExecutorConfig::for_device(ordinal))
    }

    /// Cached executor for `config`, created on first use.
    ///
    /// A configuration carrying a host runtime stream is only looked up:
    /// `NotFound` if no executor was attached to that stream.
    fn get_executor(&self, config: &ExecutorConfig) -> Result<Arc<Executor>>;

    /// Fresh executor for `config`, bypassing the cache.
    fn get_uncached_executor(&self, config: &ExecutorConfig) -> Result<Executor>;
}

pub struct XpuPlatform {
    name: String,
    descriptors: DescriptorProvider,
    library: Arc<dyn PrimitiveLibrary>,
    cache: ExecutorCache,
    topology: TopologyState,
}

impl fmt::Debug for XpuPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XpuPlatform")
            .field("name", &self.name)
            .field("driver", &self.descriptors.driver().name())
            .field("library", &self.library.name())
            .field("executors", &self.cache.len())
            .field("topology", &self.topology.snapshot())
            .finish()
    }
}

impl XpuPlatform {
    pub fn new(driver: Arc<dyn Driver>, library: Arc<dyn PrimitiveLibrary>) -> Self {
        Self {
            name: "XPU".to_string(),
            descriptors: DescriptorProvider::new(driver),
            library,
            cache: ExecutorCache::new(),
            topology: TopologyState::new(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.descriptors.driver()
    }

    pub fn descriptors(&self) -> &DescriptorProvider {
        &self.descriptors
    }

    pub fn topology(&self) -> &TopologyState {
        &self.topology
    }

    /// Number of live cached executors.
    pub fn executor_count(&self) -> usize {
        self.cache.len()
    }

    /// Create (or find) the executor bound to the host runtime stream in
    /// `config`, so later [`Platform::get_executor`] lookups find it.
    pub fn attach_stream(&self, config: &ExecutorConfig) -> Result<Arc<Executor>> {
        ensure!(
            config.stream.is_some(),
            InvalidArgumentSnafu { message: format!("cannot attach {config}: configuration carries no stream") }
        );
        self.cache.get_or_create(config, || self.get_uncached_executor(config))
    }

    /// Run the primitive named `tag` on `stream` and report the outcome as a
    /// [`Status`].
    ///
    /// The executor is the default one for `stream`'s device.
    pub fn run_primitive(
        &self,
        tag: &str,
        stream: &Stream,
        params: &Dictionary,
        inputs: &[BufferDescriptor<'_>],
        output: &mut OutputBuffer<'_>,
        scratch: &dyn ScratchAllocator,
    ) -> Status {
        let result = tag
            .parse::<ConvKind>()
            .map_err(|_| UnimplementedSnafu { message: format!("unsupported primitive '{tag}'") }.build())
            .and_then(|kind| {
                let executor = self.executor_for_device(stream.ordinal())?;
                executor.run_convolution(stream, params, inputs, output, scratch, kind)
            });

        if let Err(error) = &result {
            tracing::debug!(primitive = tag, stream = %stream.id(), %error, "primitive dispatch failed");
        }
        Status::from(result)
    }

    fn inspect_topology(&self) -> Result<BusTopology> {
        self.topology.get_or_inspect(|| {
            let mut numa_nodes = Vec::with_capacity(self.visible_device_count());
            for ordinal in 0..self.visible_device_count() {
                let executor = self.executor_for_device(ordinal)?;
                numa_nodes.push(executor.descriptor().numa_node);
            }
            Ok(BusTopology::from_numa_nodes(numa_nodes))
        })
    }
}

impl Platform for XpuPlatform {
    fn id(&self) -> PlatformId {
        XPU_PLATFORM_ID
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn visible_device_count(&self) -> usize {
        self.descriptors.visible_device_count()
    }

    fn description_for_device(&self, ordinal: usize) -> Result<Arc<DeviceDescriptor>> {
        self.descriptors.descriptor_for(ordinal).context(DeviceSnafu)
    }

    fn bus_count(&self) -> Result<usize> {
        Ok(self.inspect_topology()?.bus_count())
    }

    fn device_to_bus(&self, ordinal: usize) -> Result<i64> {
        let descriptor = self.description_for_device(ordinal)?;
        Ok(i64::from(descriptor.numa_node) - self.topology.min_bus_id())
    }

    fn first_executor_for_bus(&self, bus: usize) -> Result<Arc<Executor>> {
        let bus_count = self.inspect_topology()?.bus_count();
        ensure!(
            bus < bus_count,
            InvalidArgumentSnafu { message: format!("bus ordinal {bus} out of available range ({bus_count} buses)") }
        );

        for ordinal in 0..self.visible_device_count() {
            if usize::try_from(self.device_to_bus(ordinal)?).ok() == Some(bus) {
                return self.executor_for_device(ordinal);
            }
        }

        NotFoundSnafu { message: format!("executor for bus {bus} not found") }.fail()
    }

    fn get_executor(&self, config: &ExecutorConfig) -> Result<Arc<Executor>> {
        if config.stream.is_some() {
            return self.cache.get(config);
        }
        self.cache.get_or_create(config, || self.get_uncached_executor(config))
    }

    fn get_uncached_executor(&self, config: &ExecutorConfig) -> Result<Executor> {
        let ordinal = config.ordinal;
        let count = self.visible_device_count();
        ensure!(
            ordinal < count,
            NotFoundSnafu { message: format!("device ordinal {ordinal} out of range: {count} visible devices") }
        );

        Executor::initialize(config.clone(), &self.descriptors, Arc::clone(&self.library))
            .inspect_err(|error| tracing::warn!(device.ordinal = ordinal, %error, "executor initialization failed"))
            .context(InternalSnafu { ordinal })
    }
}
