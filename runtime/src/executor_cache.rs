//! Executor cache with single-flight creation.
//!
//! Every configuration maps to a slot (`Arc<OnceCell<Arc<Executor>>>`). The
//! map lock is held only long enough to find or insert the slot; the factory
//! runs inside the slot's `OnceCell`, so:
//!
//! - concurrent requests for the same configuration run the factory at most
//!   once at a time and all observe the executor it produced;
//! - requests for different configurations never wait on each other's
//!   factories;
//! - a failed factory leaves the map as it found it, so the next request
//!   retries.
//!
//! Entries live as long as the cache. There is no eviction.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::config::ExecutorConfig;
use crate::error::{NotFoundSnafu, Result};
use crate::executor::Executor;

type Slot = Arc<OnceCell<Arc<Executor>>>;

#[derive(Debug, Default)]
pub struct ExecutorCache {
    slots: RwLock<HashMap<ExecutorConfig, Slot>>,
}

impl ExecutorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live executor without creating one.
    pub fn get(&self, config: &ExecutorConfig) -> Result<Arc<Executor>> {
        self.slots
            .read()
            .get(config)
            .and_then(|slot| slot.get().cloned())
            .ok_or_else(|| NotFoundSnafu { message: format!("no executor registered for {config}") }.build())
    }

    /// Return the executor for `config`, running `factory` if there is none.
    ///
    /// # Errors
    ///
    /// Whatever `factory` returns. The cache is left without an entry for
    /// `config` in that case.
    pub fn get_or_create<F>(&self, config: &ExecutorConfig, factory: F) -> Result<Arc<Executor>>
    where
        F: FnOnce() -> Result<Executor>,
    {
        let slot = self.slot(config);

        if let Some(executor) = slot.get() {
            tracing::trace!(%config, "executor cache hit");
            return Ok(Arc::clone(executor));
        }

        let created = slot
            .get_or_try_init(|| {
                let executor = factory()?;
                tracing::debug!(%config, "executor cached");
                Ok(Arc::new(executor))
            })
            .map(Arc::clone);

        if created.is_err() {
            self.discard_empty(config, slot);
        }
        created
    }

    /// Number of live executors.
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configurations with a live executor.
    pub fn configs(&self) -> Vec<ExecutorConfig> {
        self.slots.read().iter().filter(|(_, slot)| slot.get().is_some()).map(|(config, _)| config.clone()).collect()
    }

    /// Number of map entries, empty slots of in-flight factories included.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Drop the slot of a failed factory unless another caller still holds it
    /// and will retry.
    fn discard_empty(&self, config: &ExecutorConfig, slot: Slot) {
        let mut slots = self.slots.write();
        // One reference in the map, one here
        let unshared = Arc::strong_count(&slot) == 2;
        if unshared
            && slot.get().is_none()
            && slots.get(config).is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            slots.remove(config);
        }
    }

    fn slot(&self, config: &ExecutorConfig) -> Slot {
        // Fast path: read lock
        if let Some(slot) = self.slots.read().get(config) {
            return Arc::clone(slot);
        }

        // Slow path: another thread may have inserted the slot in between
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(config.clone()).or_default())
    }
}
