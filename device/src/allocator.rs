use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::ensure;

use crate::driver::Driver;
use crate::error::{Result, ScratchExhaustedSnafu};
use crate::queue::{Stream, StreamId};

/// A block of device memory.
///
/// Host-simulated devices back this with host memory; the bytes are
/// zero-initialized.
pub struct DeviceMemory {
    ordinal: usize,
    data: Box<[u8]>,
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory").field("ordinal", &self.ordinal).field("size", &self.data.len()).finish()
    }
}

impl DeviceMemory {
    pub fn zeroed(ordinal: usize, size: usize) -> Self {
        Self { ordinal, data: vec![0u8; size].into_boxed_slice() }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Source of temporary device memory for a single dispatch call.
///
/// A scratch allocator is bound to the stream the dispatch is issued on;
/// memory it hands out must only be used by work on that stream.
pub trait ScratchAllocator: Send + Sync + fmt::Debug {
    /// Stream this allocator is bound to.
    fn stream_id(&self) -> StreamId;

    /// Total number of bytes this allocator may hand out.
    fn memory_limit(&self) -> usize;

    fn allocate(&self, size: usize) -> Result<DeviceMemory>;
}

/// Scratch allocator that draws from the driver and enforces a byte budget.
///
/// The budget is cumulative over the allocator's lifetime, which matches its
/// intended per-call use.
pub struct StreamScratchAllocator {
    stream_id: StreamId,
    ordinal: usize,
    driver: Arc<dyn Driver>,
    limit: usize,
    allocated: Mutex<usize>,
}

impl fmt::Debug for StreamScratchAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamScratchAllocator")
            .field("stream_id", &self.stream_id)
            .field("ordinal", &self.ordinal)
            .field("limit", &self.limit)
            .field("allocated", &*self.allocated.lock())
            .finish()
    }
}

impl StreamScratchAllocator {
    pub fn new(driver: Arc<dyn Driver>, stream: &Stream, limit: usize) -> Self {
        Self { stream_id: stream.id(), ordinal: stream.ordinal(), driver, limit, allocated: Mutex::new(0) }
    }

    /// Bytes handed out so far.
    pub fn allocated(&self) -> usize {
        *self.allocated.lock()
    }
}

impl ScratchAllocator for StreamScratchAllocator {
    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn memory_limit(&self) -> usize {
        self.limit
    }

    fn allocate(&self, size: usize) -> Result<DeviceMemory> {
        let mut allocated = self.allocated.lock();
        let in_use = *allocated;
        ensure!(
            in_use.checked_add(size).is_some_and(|total| total <= self.limit),
            ScratchExhaustedSnafu { requested: size, in_use, limit: self.limit }
        );

        let memory = self.driver.allocate(self.ordinal, size)?;
        *allocated += size;
        tracing::trace!(stream = %self.stream_id, device.ordinal = self.ordinal, size, "scratch allocated");
        Ok(memory)
    }
}
