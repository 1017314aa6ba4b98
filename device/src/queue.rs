//! Device streams.
//!
//! A [`Stream`] is an ordered queue of device work bound to one device
//! ordinal. Work submitted through [`Stream::enqueue`] retires in submission
//! order; each submission is assigned the next value on the stream's timeline
//! signal, so callers can wait for a particular submission with
//! [`Stream::wait_for`] or for everything with [`Stream::synchronize`].
//!
//! Ordering across streams is not guaranteed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::sync::{HostTimelineSignal, TimelineSignal};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Opaque handle of a stream created and owned by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub struct Stream {
    id: StreamId,
    ordinal: usize,
    external: Option<StreamHandle>,
    signal: Arc<HostTimelineSignal>,
    /// Last timeline value handed out. Only advanced under `order`.
    submitted: AtomicU64,
    order: Mutex<()>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("ordinal", &self.ordinal)
            .field("external", &self.external)
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("completed", &self.signal.value())
            .finish()
    }
}

impl Stream {
    /// Create a stream on device `ordinal`.
    pub fn new(ordinal: usize) -> Self {
        Self::build(ordinal, None)
    }

    /// Wrap a stream the host runtime already owns.
    pub fn wrap(ordinal: usize, handle: StreamHandle) -> Self {
        Self::build(ordinal, Some(handle))
    }

    fn build(ordinal: usize, external: Option<StreamHandle>) -> Self {
        Self {
            id: StreamId::next(),
            ordinal,
            external,
            signal: Arc::new(HostTimelineSignal::new()),
            submitted: AtomicU64::new(0),
            order: Mutex::new(()),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Host runtime handle this stream wraps, if any.
    pub fn external_handle(&self) -> Option<StreamHandle> {
        self.external
    }

    pub fn signal(&self) -> Arc<dyn TimelineSignal> {
        self.signal.clone()
    }

    /// Submit `work` and return its outcome together with its timeline value.
    ///
    /// Submissions on one stream are serialized. The timeline advances even
    /// when `work` fails: the submission has retired either way.
    pub fn enqueue<T, E>(&self, work: impl FnOnce() -> Result<T, E>) -> (u64, Result<T, E>) {
        let _order = self.order.lock();
        let value = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        let result = work();
        self.signal.set(value);
        (value, result)
    }

    /// Timeline value of the most recent submission.
    pub fn last_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Timeline value of the most recently retired submission.
    pub fn completed(&self) -> u64 {
        self.signal.value()
    }

    pub fn wait_for(&self, value: u64, timeout_ms: u64) -> Result<()> {
        self.signal.wait(value, timeout_ms)
    }

    /// Block until everything submitted so far has retired.
    pub fn synchronize(&self) -> Result<()> {
        self.signal.wait(self.last_submitted(), 0)
    }
}
