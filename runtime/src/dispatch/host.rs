//! Reference convolution on host memory.
//!
//! `HostPrimitives` runs every [`ConvKind`] on `f32` buffers with a direct
//! loop nest. All three directions share one walk over the valid
//! (output position, kernel tap, input position) triples; they differ only in
//! which buffer accumulates.

use snafu::{ResultExt, ensure};
use xpu_device::{Dims, ElementType, OutputBuffer, ScratchAllocator};

use super::conv::{ConvKind, ConvShape, WindowDim};
use super::library::{ConvCall, PrimitiveLibrary};
use crate::error::{DeviceSnafu, ResourceExhaustedSnafu, Result, UnimplementedSnafu};

#[derive(Debug, Clone, Copy, Default)]
pub struct HostPrimitives;

impl PrimitiveLibrary for HostPrimitives {
    fn name(&self) -> &str {
        "host"
    }

    fn convolution(
        &self,
        call: &ConvCall<'_>,
        output: &mut OutputBuffer<'_>,
        scratch: &dyn ScratchAllocator,
    ) -> Result<()> {
        ensure!(
            call.element_type == ElementType::F32,
            UnimplementedSnafu { message: format!("{} on {} buffers", call.kind, call.element_type) }
        );

        let mut workspace = scratch.allocate(output.as_bytes().len()).context(ResourceExhaustedSnafu)?;

        let lhs = decode(call.inputs[0].as_bytes());
        let rhs = decode(call.inputs[1].as_bytes());
        let mut acc = vec![0f32; output.element_count()];
        accumulate(call.kind, call.shape, &call.params.window, &lhs, &rhs, &mut acc);

        if call.kind == ConvKind::ForwardActivation
            && let Some(fusion) = call.params.fusion
        {
            let bias = decode(call.inputs[2].as_bytes());
            let side = call.inputs.get(3).map(|side| decode(side.as_bytes()));
            let plane = call.shape.output_spatial.iter().product::<usize>();
            let features = call.shape.output_features;

            for (index, value) in acc.iter_mut().enumerate() {
                let mut fused = fusion.conv_result_scale as f32 * *value;
                if let Some(side) = &side {
                    fused += fusion.side_input_scale as f32 * side[index];
                }
                fused += bias[(index / plane) % features];
                *value = fusion.activation.apply(fused);
            }
        }

        for (chunk, value) in workspace.as_mut_slice().chunks_exact_mut(4).zip(&acc) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        output.write_bytes(workspace.as_slice()).context(DeviceSnafu)
    }
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect()
}

/// Row-major multi-index of `flat` within `dims`.
fn unravel(mut flat: usize, dims: &[usize]) -> Dims {
    let mut index = Dims::from_elem(0, dims.len());
    for (slot, &extent) in index.iter_mut().zip(dims).rev() {
        *slot = flat % extent;
        flat /= extent;
    }
    index
}

/// Every (output, kernel, input) flat spatial offset triple that reads real
/// input data.
fn taps(shape: &ConvShape, window: &[WindowDim]) -> Vec<(usize, usize, usize)> {
    let output_size: usize = shape.output_spatial.iter().product();
    let kernel_size: usize = shape.kernel_spatial.iter().product();
    let mut taps = Vec::new();

    for out_flat in 0..output_size {
        let out = unravel(out_flat, &shape.output_spatial);
        'tap: for kernel_flat in 0..kernel_size {
            let tap = unravel(kernel_flat, &shape.kernel_spatial);
            let mut in_flat = 0;
            for dim in 0..window.len() {
                let Some(index) = window[dim].input_index(out[dim], tap[dim], shape.input_spatial[dim]) else {
                    continue 'tap;
                };
                in_flat = in_flat * shape.input_spatial[dim] + index;
            }
            taps.push((out_flat, kernel_flat, in_flat));
        }
    }
    taps
}

/// Accumulate the direct convolution of `lhs` and `rhs` into `acc`.
///
/// Forward: `lhs` operand, `rhs` kernel, `acc` result.
/// Backward input: `lhs` result gradient, `rhs` kernel, `acc` operand gradient.
/// Backward filter: `lhs` operand, `rhs` result gradient, `acc` kernel gradient.
fn accumulate(kind: ConvKind, shape: &ConvShape, window: &[WindowDim], lhs: &[f32], rhs: &[f32], acc: &mut [f32]) {
    let taps = taps(shape, window);
    let input_size: usize = shape.input_spatial.iter().product();
    let kernel_size: usize = shape.kernel_spatial.iter().product();
    let output_size: usize = shape.output_spatial.iter().product();

    let group_inputs = shape.input_features / shape.groups;
    let group_outputs = shape.output_features / shape.groups;

    for n in 0..shape.batch {
        for group in 0..shape.groups {
            for o in group * group_outputs..(group + 1) * group_outputs {
                for c_local in 0..group_inputs {
                    let c = group * group_inputs + c_local;
                    let x_base = (n * shape.input_features + c) * input_size;
                    let w_base = (o * group_inputs + c_local) * kernel_size;
                    let y_base = (n * shape.output_features + o) * output_size;

                    for &(out_i, k_i, in_i) in &taps {
                        match kind {
                            ConvKind::Forward | ConvKind::ForwardActivation => {
                                acc[y_base + out_i] += lhs[x_base + in_i] * rhs[w_base + k_i];
                            }
                            ConvKind::BackwardInput => {
                                acc[x_base + in_i] += lhs[y_base + out_i] * rhs[w_base + k_i];
                            }
                            ConvKind::BackwardFilter => {
                                acc[w_base + k_i] += lhs[x_base + in_i] * rhs[y_base + out_i];
                            }
                        }
                    }
                }
            }
        }
    }
}
