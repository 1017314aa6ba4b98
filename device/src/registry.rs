//! Per-ordinal device descriptor cache.
//!
//! Descriptors are queried from the driver the first time an ordinal is asked
//! for and memoized afterwards. The cache is papaya's lock-free map, so
//! lookups for different ordinals never contend.
//!
//! Two threads racing on the first query for the same ordinal may both reach
//! the driver; the first descriptor inserted wins and both callers receive it.

use std::sync::Arc;

use papaya::HashMap;
use snafu::ensure;

use crate::device::DeviceDescriptor;
use crate::driver::Driver;
use crate::error::{OrdinalOutOfRangeSnafu, Result};

pub struct DescriptorProvider {
    driver: Arc<dyn Driver>,
    descriptors: HashMap<usize, Arc<DeviceDescriptor>>,
}

impl std::fmt::Debug for DescriptorProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorProvider")
            .field("driver", &self.driver.name())
            .field("cached", &self.cached_count())
            .finish()
    }
}

impl DescriptorProvider {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver, descriptors: HashMap::new() }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn visible_device_count(&self) -> usize {
        self.driver.device_count()
    }

    /// Descriptor for `ordinal`, querying the driver on first use.
    ///
    /// # Errors
    ///
    /// [`crate::Error::OrdinalOutOfRange`] if `ordinal` is not visible, or the
    /// driver's error if the query itself fails.
    pub fn descriptor_for(&self, ordinal: usize) -> Result<Arc<DeviceDescriptor>> {
        let count = self.visible_device_count();
        ensure!(ordinal < count, OrdinalOutOfRangeSnafu { ordinal, count });

        let guard = self.descriptors.guard();
        if let Some(descriptor) = self.descriptors.get(&ordinal, &guard) {
            return Ok(Arc::clone(descriptor));
        }

        let descriptor = Arc::new(self.driver.query_descriptor(ordinal)?);
        tracing::debug!(device.ordinal = ordinal, device.numa_node = descriptor.numa_node, "device descriptor queried");

        use papaya::{Compute, Operation};
        match self.descriptors.compute(
            ordinal,
            |entry| match entry {
                Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
                None => Operation::Insert(Arc::clone(&descriptor)),
            },
            &guard,
        ) {
            Compute::Inserted(_, inserted) => Ok(Arc::clone(inserted)),
            Compute::Aborted(existing) => Ok(existing),
            _ => Ok(descriptor),
        }
    }

    /// Number of ordinals whose descriptor has been memoized.
    pub fn cached_count(&self) -> usize {
        self.descriptors.len()
    }
}
