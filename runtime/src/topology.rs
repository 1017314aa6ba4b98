//! Bus topology inferred from device NUMA nodes.
//!
//! The driver exposes per-device descriptors only, so the bus layout is
//! folded from every visible device's `numa_node` the first time somebody
//! needs it. [`TopologyState`] makes that scan happen once per platform:
//!
//! ```text
//! Uninitialized ──(first caller)──> InProgress ──(scan ok)──> Done
//!       ^                               │
//!       └──────────(scan failed)────────┘
//! ```
//!
//! Callers arriving while a scan is in progress block until it finishes. Once
//! `Done`, the snapshot is read without taking the lock.

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

/// Bus id range covering every visible device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusTopology {
    pub min_bus_id: i64,
    /// One past the largest bus id.
    pub limit_bus_id: i64,
}

impl BusTopology {
    /// Fold device NUMA nodes into a bus range. No devices gives `0..0`.
    pub fn from_numa_nodes(numa_nodes: impl IntoIterator<Item = i32>) -> Self {
        numa_nodes
            .into_iter()
            .map(i64::from)
            .fold(None, |acc: Option<Self>, node| {
                Some(match acc {
                    None => Self { min_bus_id: node, limit_bus_id: node + 1 },
                    Some(range) => Self {
                        min_bus_id: range.min_bus_id.min(node),
                        limit_bus_id: range.limit_bus_id.max(node + 1),
                    },
                })
            })
            .unwrap_or_default()
    }

    pub fn bus_count(&self) -> usize {
        usize::try_from(self.limit_bus_id - self.min_bus_id).unwrap_or(0)
    }

    /// Bus id of a device on `numa_node`.
    pub fn bus_of(&self, numa_node: i32) -> i64 {
        i64::from(numa_node) - self.min_bus_id
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Uninitialized,
    InProgress,
    Done(BusTopology),
}

#[derive(Debug)]
pub struct TopologyState {
    phase: Mutex<Phase>,
    ready: Condvar,
    /// Published before `phase` becomes `Done`.
    snapshot: OnceCell<BusTopology>,
    scans: AtomicUsize,
}

impl Default for TopologyState {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyState {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Uninitialized),
            ready: Condvar::new(),
            snapshot: OnceCell::new(),
            scans: AtomicUsize::new(0),
        }
    }

    /// Completed topology, if a scan has succeeded.
    pub fn snapshot(&self) -> Option<BusTopology> {
        self.snapshot.get().copied()
    }

    /// Smallest bus id, or 0 before the first successful scan.
    pub fn min_bus_id(&self) -> i64 {
        self.snapshot().map_or(0, |topology| topology.min_bus_id)
    }

    /// Number of scans started so far, failed ones included.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Acquire)
    }

    /// Return the topology, running `scan` if no scan has completed yet.
    ///
    /// Exactly one caller runs `scan` at a time; the others wait for it. If
    /// the scan fails its error goes to the scanning caller only, the state
    /// returns to `Uninitialized`, and one of the waiters scans again.
    pub fn get_or_inspect<E>(&self, scan: impl FnOnce() -> Result<BusTopology, E>) -> Result<BusTopology, E> {
        if let Some(topology) = self.snapshot() {
            return Ok(topology);
        }

        {
            let mut phase = self.phase.lock();
            loop {
                let current = *phase;
                match current {
                    Phase::Done(topology) => return Ok(topology),
                    Phase::InProgress => self.ready.wait(&mut phase),
                    Phase::Uninitialized => {
                        *phase = Phase::InProgress;
                        break;
                    }
                }
            }
        }

        let _guard = ScanGuard { state: self };
        self.scans.fetch_add(1, Ordering::AcqRel);

        let topology = scan()?;
        let topology = *self.snapshot.get_or_init(|| topology);
        *self.phase.lock() = Phase::Done(topology);

        tracing::debug!(
            min_bus_id = topology.min_bus_id,
            limit_bus_id = topology.limit_bus_id,
            bus_count = topology.bus_count(),
            "bus topology inspected"
        );
        Ok(topology)
    }
}

/// Wakes waiters when a scan ends, and rolls an unfinished scan back to
/// `Uninitialized` (error return or unwind).
struct ScanGuard<'a> {
    state: &'a TopologyState,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        let mut phase = self.state.phase.lock();
        if matches!(*phase, Phase::InProgress) {
            *phase = Phase::Uninitialized;
        }
        drop(phase);
        self.state.ready.notify_all();
    }
}
