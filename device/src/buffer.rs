//! Borrowed buffer descriptors.
//!
//! The host runtime owns every operand and result buffer. A dispatch call only
//! sees descriptors: a byte view plus element type and dimensions. Input
//! descriptors are shared borrows; the single output descriptor is the only
//! mutable one, so the borrow checker enforces that a dispatch cannot write
//! to its inputs.

use std::fmt;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::dtype::ElementType;
use crate::error::{Result, ShapeOverflowSnafu, SizeMismatchSnafu};

/// Dimensions, stack-allocated up to rank 4.
pub type Dims = SmallVec<[usize; 4]>;

fn byte_size(element_type: ElementType, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(element_type.bytes(), |bytes, &dim| bytes.checked_mul(dim))
        .context(ShapeOverflowSnafu { element_type, dims: dims.to_vec() })
}

/// Read-only view of an operand buffer.
#[derive(Clone, Copy)]
pub struct BufferDescriptor<'a> {
    data: &'a [u8],
    element_type: ElementType,
    dims: &'a [usize],
}

impl fmt::Debug for BufferDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("element_type", &self.element_type)
            .field("dims", &self.dims)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl<'a> BufferDescriptor<'a> {
    /// Describe `data` as a dense buffer of `element_type` with `dims`.
    pub fn new(data: &'a [u8], element_type: ElementType, dims: &'a [usize]) -> Result<Self> {
        let expected = byte_size(element_type, dims)?;
        ensure!(data.len() == expected, SizeMismatchSnafu { expected, actual: data.len() });
        Ok(Self { data, element_type, dims })
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn dims(&self) -> &'a [usize] {
        self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// Writable view of the result buffer.
pub struct OutputBuffer<'a> {
    data: &'a mut [u8],
    element_type: ElementType,
    dims: Dims,
}

impl fmt::Debug for OutputBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("element_type", &self.element_type)
            .field("dims", &self.dims)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl<'a> OutputBuffer<'a> {
    pub fn new(data: &'a mut [u8], element_type: ElementType, dims: &[usize]) -> Result<Self> {
        let expected = byte_size(element_type, dims)?;
        ensure!(data.len() == expected, SizeMismatchSnafu { expected, actual: data.len() });
        Ok(Self { data, element_type, dims: SmallVec::from_slice(dims) })
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &*self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Overwrite the whole buffer with `src`.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        ensure!(src.len() == self.data.len(), SizeMismatchSnafu { expected: self.data.len(), actual: src.len() });
        self.data.copy_from_slice(src);
        Ok(())
    }
}
