use xpu_device::{BufferDescriptor, ElementType, OutputBuffer, ScratchAllocator};

use super::conv::{ConvKind, ConvParams, ConvShape};
use crate::error::Result;

/// One validated convolution, ready for a library to execute.
///
/// `inputs` are in the order [`ConvKind`] documents. Shapes, element types
/// and arity have already been checked against `params`.
#[derive(Debug, Clone, Copy)]
pub struct ConvCall<'a> {
    pub kind: ConvKind,
    pub element_type: ElementType,
    pub params: &'a ConvParams,
    pub shape: &'a ConvShape,
    pub inputs: &'a [BufferDescriptor<'a>],
}

/// Compute-primitives library seam.
pub trait PrimitiveLibrary: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Execute `call`, writing the result to `output`.
    ///
    /// Temporary memory comes from `scratch`. Implementations must leave
    /// `output` untouched when they fail.
    fn convolution(&self, call: &ConvCall<'_>, output: &mut OutputBuffer<'_>, scratch: &dyn ScratchAllocator)
    -> Result<()>;
}
