//! Timeline signals used to order work on a stream.
//!
//! A timeline signal is a counter that only moves forward. Every submission
//! on a [`crate::queue::Stream`] is assigned the next timeline value, and the
//! stream raises the signal to that value once the submission has retired.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use snafu::ensure;

use crate::error::{Result, SignalTimeoutSnafu};

pub trait TimelineSignal: Send + Sync + std::fmt::Debug {
    fn value(&self) -> u64;

    /// Raise the signal to `value`. Lower values are ignored.
    fn set(&self, value: u64);

    /// Block until the signal reaches `value`.
    ///
    /// `timeout_ms == 0` waits forever.
    fn wait(&self, value: u64, timeout_ms: u64) -> Result<()>;

    fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }
}

/// Timeline signal for host-side waiters.
#[derive(Debug, Default)]
pub struct HostTimelineSignal {
    reached: Mutex<u64>,
    advanced: Condvar,
}

impl HostTimelineSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(initial: u64) -> Self {
        Self { reached: Mutex::new(initial), advanced: Condvar::new() }
    }
}

impl TimelineSignal for HostTimelineSignal {
    fn value(&self) -> u64 {
        *self.reached.lock()
    }

    fn set(&self, value: u64) {
        let mut reached = self.reached.lock();
        if value > *reached {
            *reached = value;
            self.advanced.notify_all();
        }
    }

    fn wait(&self, target: u64, timeout_ms: u64) -> Result<()> {
        let mut reached = self.reached.lock();

        if timeout_ms == 0 {
            self.advanced.wait_while(&mut reached, |reached| *reached < target);
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        self.advanced.wait_while_until(&mut reached, |reached| *reached < target, deadline);
        ensure!(*reached >= target, SignalTimeoutSnafu { timeout_ms, target, current: *reached });
        Ok(())
    }
}
