//! Convolution operation kinds, parameters and shapes.
//!
//! Layouts are fixed: operands are `[N, C, spatial...]`, kernels are
//! `[O, C / groups, spatial...]` and results are `[N, O, spatial...]`.

use smallvec::SmallVec;
use snafu::ensure;
use xpu_device::Dims;

use super::params::{Dictionary, ParamReader};
use crate::error::{InvalidArgumentSnafu, Result};

/// Convolution flavour, named by the tag the host runtime uses for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumString, strum::IntoStaticStr, strum::VariantArray)]
pub enum ConvKind {
    /// operand, kernel -> result
    #[strum(serialize = "convForward")]
    Forward,
    /// result gradient, kernel -> operand gradient
    #[strum(serialize = "convBackwardInput")]
    BackwardInput,
    /// operand, result gradient -> kernel gradient
    #[strum(serialize = "convBackwardFilter")]
    BackwardFilter,
    /// operand, kernel, bias[, side input] -> activation(scaled result + bias)
    #[strum(serialize = "convBiasActivationForward")]
    ForwardActivation,
}

impl ConvKind {
    pub fn tag(self) -> &'static str {
        self.into()
    }

    /// Fewest inputs the kind can take.
    pub fn min_inputs(self) -> usize {
        match self {
            ConvKind::ForwardActivation => 3,
            _ => 2,
        }
    }

    /// Exact number of inputs, given whether a side input is fused in.
    pub fn input_count(self, side_input: bool) -> usize {
        match self {
            ConvKind::ForwardActivation if side_input => 4,
            kind => kind.min_inputs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(strum::Display, strum::EnumString, strum::VariantArray)]
#[strum(serialize_all = "lowercase")]
pub enum ActivationMode {
    #[default]
    None,
    Relu,
    Relu6,
}

impl ActivationMode {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ActivationMode::None => x,
            ActivationMode::Relu => x.max(0.0),
            ActivationMode::Relu6 => x.clamp(0.0, 6.0),
        }
    }
}

/// Window configuration of one spatial dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDim {
    pub stride: usize,
    pub padding_low: usize,
    pub padding_high: usize,
    pub lhs_dilation: usize,
    pub rhs_dilation: usize,
}

impl WindowDim {
    /// Output extent for an input of `input` elements and a kernel of
    /// `kernel` taps, or `None` if the dilated kernel does not fit the padded
    /// input or the padded extent overflows.
    pub fn output_size(&self, input: usize, kernel: usize) -> Option<usize> {
        if input == 0 || kernel == 0 {
            return None;
        }
        let padded = (input - 1)
            .checked_mul(self.lhs_dilation)?
            .checked_add(1)?
            .checked_add(self.padding_low)?
            .checked_add(self.padding_high)?;
        let effective_kernel = (kernel - 1).checked_mul(self.rhs_dilation)?.checked_add(1)?;
        padded.checked_sub(effective_kernel).map(|span| span / self.stride + 1)
    }

    /// Input coordinate read by output `out` through kernel tap `tap`, or
    /// `None` if it falls in padding or a dilation hole.
    pub fn input_index(&self, out: usize, tap: usize, input: usize) -> Option<usize> {
        let padded = out
            .checked_mul(self.stride)?
            .checked_add(tap.checked_mul(self.rhs_dilation)?)?
            .checked_sub(self.padding_low)?;
        if padded % self.lhs_dilation != 0 {
            return None;
        }
        let index = padded / self.lhs_dilation;
        (index < input).then_some(index)
    }
}

/// Epilogue of [`ConvKind::ForwardActivation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub conv_result_scale: f64,
    /// Zero means there is no side input.
    pub side_input_scale: f64,
    pub activation: ActivationMode,
}

impl FusionParams {
    pub fn has_side_input(&self) -> bool {
        self.side_input_scale != 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    /// One entry per spatial dimension.
    pub window: SmallVec<[WindowDim; 4]>,
    pub feature_group_count: usize,
    pub fusion: Option<FusionParams>,
}

impl ConvParams {
    /// Read the parameters of `kind` for a convolution with `spatial_rank`
    /// spatial dimensions.
    pub fn from_dictionary(dict: &Dictionary, kind: ConvKind, spatial_rank: usize) -> Result<Self> {
        let mut reader = ParamReader::new(dict);

        let strides = reader.ints("window_strides", spatial_rank)?;
        let padding_low = reader.ints("padding_low", spatial_rank)?;
        let padding_high = reader.ints("padding_high", spatial_rank)?;
        let lhs_dilation = reader.optional_ints("lhs_dilation", spatial_rank)?;
        let rhs_dilation = reader.optional_ints("rhs_dilation", spatial_rank)?;
        let feature_group_count = positive("feature_group_count", reader.int("feature_group_count")?)?;

        let mut window = SmallVec::with_capacity(spatial_rank);
        for dim in 0..spatial_rank {
            window.push(WindowDim {
                stride: positive("window_strides", strides[dim])?,
                padding_low: non_negative("padding_low", padding_low[dim])?,
                padding_high: non_negative("padding_high", padding_high[dim])?,
                lhs_dilation: lhs_dilation.map_or(Ok(1), |d| positive("lhs_dilation", d[dim]))?,
                rhs_dilation: rhs_dilation.map_or(Ok(1), |d| positive("rhs_dilation", d[dim]))?,
            });
        }

        let fusion = match kind {
            ConvKind::ForwardActivation => {
                let activation = reader.string("activation_mode")?;
                Some(FusionParams {
                    conv_result_scale: reader.float("conv_result_scale")?,
                    side_input_scale: reader.float("side_input_scale")?,
                    activation: activation.parse().map_err(|_| {
                        InvalidArgumentSnafu { message: format!("unknown activation mode '{activation}'") }.build()
                    })?,
                })
            }
            _ => None,
        };

        reader.finish()?;
        Ok(Self { window, feature_group_count, fusion })
    }

    pub fn spatial_rank(&self) -> usize {
        self.window.len()
    }

    pub fn has_side_input(&self) -> bool {
        self.fusion.is_some_and(|fusion| fusion.has_side_input())
    }
}

fn positive(key: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| {
            InvalidArgumentSnafu { message: format!("parameter '{key}' must be positive, got {value}") }.build()
        })
}

fn non_negative(key: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        InvalidArgumentSnafu { message: format!("parameter '{key}' must not be negative, got {value}") }.build()
    })
}

/// Resolved convolution geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvShape {
    pub batch: usize,
    pub input_features: usize,
    pub output_features: usize,
    pub groups: usize,
    pub input_spatial: Dims,
    pub kernel_spatial: Dims,
    pub output_spatial: Dims,
}

impl ConvShape {
    /// Check operand, kernel and result dimensions against each other and
    /// against `params`.
    pub fn infer(operand: &[usize], kernel: &[usize], result: &[usize], params: &ConvParams) -> Result<Self> {
        let rank = params.spatial_rank() + 2;
        for (role, dims) in [("operand", operand), ("kernel", kernel), ("result", result)] {
            ensure!(
                dims.len() == rank,
                InvalidArgumentSnafu { message: format!("{role} has rank {}, expected {rank}", dims.len()) }
            );
        }

        let groups = params.feature_group_count;
        let (batch, input_features) = (operand[0], operand[1]);
        let output_features = kernel[0];

        ensure!(
            kernel[1].checked_mul(groups) == Some(input_features),
            InvalidArgumentSnafu {
                message: format!(
                    "kernel input features {} times {groups} groups do not match operand features {input_features}",
                    kernel[1]
                )
            }
        );
        ensure!(
            output_features % groups == 0,
            InvalidArgumentSnafu {
                message: format!("output features {output_features} not divisible by {groups} groups")
            }
        );
        ensure!(
            result[0] == batch && result[1] == output_features,
            InvalidArgumentSnafu {
                message: format!(
                    "result is [{}, {}, ..], expected [{batch}, {output_features}, ..]",
                    result[0], result[1]
                )
            }
        );

        let input_spatial = Dims::from_slice(&operand[2..]);
        let kernel_spatial = Dims::from_slice(&kernel[2..]);
        let mut output_spatial = Dims::new();
        for (dim, window) in params.window.iter().enumerate() {
            let size = window.output_size(input_spatial[dim], kernel_spatial[dim]).ok_or_else(|| {
                InvalidArgumentSnafu {
                    message: format!(
                        "spatial dimension {dim}: kernel of {} taps does not fit input of {} under window {window:?}",
                        kernel_spatial[dim], input_spatial[dim]
                    ),
                }
                .build()
            })?;
            output_spatial.push(size);
        }
        ensure!(
            result[2..] == output_spatial[..],
            InvalidArgumentSnafu {
                message: format!("result spatial dims {:?}, expected {:?}", &result[2..], output_spatial)
            }
        );

        Ok(Self { batch, input_features, output_features, groups, input_spatial, kernel_spatial, output_spatial })
    }

    pub fn operand_dims(&self) -> Dims {
        let mut dims: Dims = [self.batch, self.input_features].into_iter().collect();
        dims.extend_from_slice(&self.input_spatial);
        dims
    }

    pub fn kernel_dims(&self) -> Dims {
        let mut dims: Dims = [self.output_features, self.input_features / self.groups].into_iter().collect();
        dims.extend_from_slice(&self.kernel_spatial);
        dims
    }

    pub fn result_dims(&self) -> Dims {
        let mut dims: Dims = [self.batch, self.output_features].into_iter().collect();
        dims.extend_from_slice(&self.output_spatial);
        dims
    }
}
