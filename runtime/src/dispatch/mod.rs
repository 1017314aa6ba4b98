//! Primitive dispatch.
//!
//! The dispatcher turns a host runtime request (kind, parameter dictionary,
//! borrowed buffers, scratch allocator, stream) into a validated
//! [`ConvCall`] and submits it to a [`PrimitiveLibrary`] on the stream.
//! Everything that can be checked is checked before submission, so a
//! rejected request never touches the output buffer.

pub mod conv;
pub mod host;
pub mod library;
pub mod params;

pub use conv::{ActivationMode, ConvKind, ConvParams, ConvShape, FusionParams, WindowDim};
pub use host::HostPrimitives;
pub use library::{ConvCall, PrimitiveLibrary};
pub use params::{Dictionary, ParamReader, ParamValue};

use snafu::ensure;
use xpu_device::{BufferDescriptor, OutputBuffer, ScratchAllocator, Stream};

use crate::error::{FailedPreconditionSnafu, InvalidArgumentSnafu, Result};

/// Validate a convolution request and run it on `stream`.
///
/// # Errors
///
/// - `FailedPrecondition` if `scratch` is bound to another stream.
/// - `InvalidArgument` for a wrong number of inputs, mismatched element
///   types, unknown/missing/ill-typed parameters, or shapes inconsistent with
///   the parameters.
/// - Whatever `library` reports (`Unimplemented`, `ResourceExhausted`, ...).
pub fn run_convolution(
    library: &dyn PrimitiveLibrary,
    stream: &Stream,
    params: &Dictionary,
    inputs: &[BufferDescriptor<'_>],
    output: &mut OutputBuffer<'_>,
    scratch: &dyn ScratchAllocator,
    kind: ConvKind,
) -> Result<()> {
    ensure!(
        scratch.stream_id() == stream.id(),
        FailedPreconditionSnafu {
            message: format!("scratch allocator is bound to {}, call issued on {}", scratch.stream_id(), stream.id())
        }
    );
    ensure!(
        inputs.len() >= kind.min_inputs(),
        InvalidArgumentSnafu {
            message: format!("{kind} expects at least {} inputs, got {}", kind.min_inputs(), inputs.len())
        }
    );

    let rank = inputs[0].rank();
    ensure!(
        rank >= 3,
        InvalidArgumentSnafu {
            message: format!("{kind} needs at least one spatial dimension, operand has rank {rank}")
        }
    );
    let params = ConvParams::from_dictionary(params, kind, rank - 2)?;

    let expected = kind.input_count(params.has_side_input());
    ensure!(
        inputs.len() == expected,
        InvalidArgumentSnafu { message: format!("{kind} expects {expected} inputs, got {}", inputs.len()) }
    );

    let element_type = inputs[0].element_type();
    ensure!(
        inputs.iter().all(|input| input.element_type() == element_type) && output.element_type() == element_type,
        InvalidArgumentSnafu { message: format!("{kind} requires every buffer to be {element_type}") }
    );

    let (operand, kernel, result_dims) = match kind {
        ConvKind::Forward | ConvKind::ForwardActivation => (inputs[0].dims(), inputs[1].dims(), output.dims()),
        ConvKind::BackwardInput => (output.dims(), inputs[1].dims(), inputs[0].dims()),
        ConvKind::BackwardFilter => (inputs[0].dims(), output.dims(), inputs[1].dims()),
    };
    let shape = ConvShape::infer(operand, kernel, result_dims, &params)?;

    if kind == ConvKind::ForwardActivation {
        ensure!(
            inputs[2].dims() == [shape.output_features],
            InvalidArgumentSnafu {
                message: format!("bias has dims {:?}, expected [{}]", inputs[2].dims(), shape.output_features)
            }
        );
        if let Some(side) = inputs.get(3) {
            ensure!(
                side.dims() == &shape.result_dims()[..],
                InvalidArgumentSnafu {
                    message: format!("side input has dims {:?}, expected {:?}", side.dims(), shape.result_dims())
                }
            );
        }
    }

    let call = ConvCall { kind, element_type, params: &params, shape: &shape, inputs };
    let (submission, result) = stream.enqueue(|| library.convolution(&call, output, scratch));
    tracing::trace!(
        primitive = kind.tag(),
        library = library.name(),
        stream = %stream.id(),
        submission,
        ok = result.is_ok(),
        "convolution dispatched"
    );
    result
}
