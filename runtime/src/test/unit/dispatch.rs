use std::sync::Arc;

use test_case::test_case;
use xpu_device::{BufferDescriptor, Driver, ElementType, HostDriver, OutputBuffer, ScratchAllocator, Stream};

use crate::dispatch::{self, ActivationMode, ConvKind, Dictionary, HostPrimitives, ParamValue};
use crate::test::fixtures::{conv_params, f32_bytes, f32_values, host_platform, run_f32, valid_params};
use crate::dispatch::{ConvParams, ConvShape};
use crate::{Error, Platform, StatusCode};

const POISON: u8 = 0xab;

fn with(mut params: Dictionary, key: &str, value: impl Into<ParamValue>) -> Dictionary {
    params.insert(key.to_string(), value.into());
    params
}

fn fused_params(scale: f64, side_input_scale: f64, activation: &str) -> Dictionary {
    let params = with(valid_params(1), "conv_result_scale", scale);
    let params = with(params, "side_input_scale", side_input_scale);
    with(params, "activation_mode", activation)
}

#[test_case("convForward", ConvKind::Forward)]
#[test_case("convBackwardInput", ConvKind::BackwardInput)]
#[test_case("convBackwardFilter", ConvKind::BackwardFilter)]
#[test_case("convBiasActivationForward", ConvKind::ForwardActivation)]
fn test_kind_tags(tag: &str, kind: ConvKind) {
    assert_eq!(tag.parse::<ConvKind>().unwrap(), kind);
    assert_eq!(kind.tag(), tag);
}

#[test]
fn test_kind_arity() {
    assert_eq!(ConvKind::Forward.input_count(false), 2);
    assert_eq!(ConvKind::BackwardFilter.input_count(true), 2);
    assert_eq!(ConvKind::ForwardActivation.input_count(false), 3);
    assert_eq!(ConvKind::ForwardActivation.input_count(true), 4);
}

#[test_case("none", 7.5, 7.5)]
#[test_case("relu", -1.0, 0.0)]
#[test_case("relu6", 7.5, 6.0)]
fn test_activation_modes(name: &str, x: f32, expected: f32) {
    let mode: ActivationMode = name.parse().unwrap();
    assert_eq!(mode.apply(x), expected);
}

#[test]
fn test_forward_1d() {
    let y = run_f32(
        ConvKind::Forward,
        &valid_params(1),
        &[(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 4]), (&[1.0, 1.0], &[1, 1, 2])],
        &[1, 1, 3],
    )
    .unwrap();

    assert_eq!(y, [3.0, 5.0, 7.0]);
}

#[test]
fn test_forward_2d_padded() {
    let ones = [1.0f32; 9];
    let y = run_f32(
        ConvKind::Forward,
        &conv_params(&[1, 1], &[1, 1], &[1, 1], 1),
        &[(&ones, &[1, 1, 3, 3]), (&ones, &[1, 1, 3, 3])],
        &[1, 1, 3, 3],
    )
    .unwrap();

    // Number of in-bounds taps at each output position
    assert_eq!(y, [4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
}

#[test]
fn test_forward_strided() {
    let y = run_f32(
        ConvKind::Forward,
        &conv_params(&[2], &[0], &[0], 1),
        &[(&[1.0, 2.0, 3.0, 4.0, 5.0], &[1, 1, 5]), (&[1.0, 1.0], &[1, 1, 2])],
        &[1, 1, 2],
    )
    .unwrap();

    assert_eq!(y, [3.0, 7.0]);
}

#[test]
fn test_forward_kernel_dilation() {
    let params = with(valid_params(1), "rhs_dilation", vec![2i64]);
    let y = run_f32(
        ConvKind::Forward,
        &params,
        &[(&[1.0, 2.0, 3.0, 4.0, 5.0], &[1, 1, 5]), (&[1.0, 1.0], &[1, 1, 2])],
        &[1, 1, 3],
    )
    .unwrap();

    assert_eq!(y, [4.0, 6.0, 8.0]);
}

#[test]
fn test_forward_input_dilation() {
    let params = with(valid_params(1), "lhs_dilation", vec![2i64]);
    let y = run_f32(
        ConvKind::Forward,
        &params,
        &[(&[1.0, 2.0, 3.0], &[1, 1, 3]), (&[1.0, 1.0], &[1, 1, 2])],
        &[1, 1, 4],
    )
    .unwrap();

    // Input reads as [1, 0, 2, 0, 3]
    assert_eq!(y, [1.0, 2.0, 2.0, 3.0]);
}

#[test]
fn test_forward_feature_groups() {
    let y = run_f32(
        ConvKind::Forward,
        &conv_params(&[1], &[0], &[0], 2),
        &[(&[1.0, 2.0, 3.0, 4.0], &[1, 2, 2]), (&[2.0, 3.0], &[2, 1, 1])],
        &[1, 2, 2],
    )
    .unwrap();

    assert_eq!(y, [2.0, 4.0, 9.0, 12.0]);
}

#[test]
fn test_forward_batch_and_channels() {
    // Two images, two input channels summed into one output channel
    let y = run_f32(
        ConvKind::Forward,
        &valid_params(1),
        &[(&[1.0, 2.0, 10.0, 20.0, 3.0, 4.0, 30.0, 40.0], &[2, 2, 2]), (&[1.0, 1.0], &[1, 2, 1])],
        &[2, 1, 2],
    )
    .unwrap();

    assert_eq!(y, [11.0, 22.0, 33.0, 44.0]);
}

#[test]
fn test_backward_input() {
    let dx = run_f32(
        ConvKind::BackwardInput,
        &valid_params(1),
        &[(&[1.0, 1.0, 1.0], &[1, 1, 3]), (&[1.0, 1.0], &[1, 1, 2])],
        &[1, 1, 4],
    )
    .unwrap();

    assert_eq!(dx, [1.0, 2.0, 2.0, 1.0]);
}

#[test]
fn test_backward_filter() {
    let dw = run_f32(
        ConvKind::BackwardFilter,
        &valid_params(1),
        &[(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 4]), (&[1.0, 1.0, 1.0], &[1, 1, 3])],
        &[1, 1, 2],
    )
    .unwrap();

    assert_eq!(dw, [6.0, 9.0]);
}

#[test_case("none", [2.5, -3.5, 6.5])]
#[test_case("relu", [2.5, 0.0, 6.5])]
#[test_case("relu6", [2.5, 0.0, 6.0])]
fn test_bias_activation(activation: &str, expected: [f32; 3]) {
    let y = run_f32(
        ConvKind::ForwardActivation,
        &fused_params(2.0, 0.0, activation),
        &[(&[1.0, -2.0, 3.0], &[1, 1, 3]), (&[1.0], &[1, 1, 1]), (&[0.5], &[1])],
        &[1, 1, 3],
    )
    .unwrap();

    assert_eq!(y, expected);
}

#[test]
fn test_bias_activation_with_side_input() {
    let y = run_f32(
        ConvKind::ForwardActivation,
        &fused_params(2.0, 1.0, "none"),
        &[(&[1.0, -2.0, 3.0], &[1, 1, 3]), (&[1.0], &[1, 1, 1]), (&[0.5], &[1]), (&[1.0, 1.0, 1.0], &[1, 1, 3])],
        &[1, 1, 3],
    )
    .unwrap();

    assert_eq!(y, [3.5, -2.5, 7.5]);
}

#[test]
fn test_side_input_scale_requires_fourth_input() {
    let err = run_f32(
        ConvKind::ForwardActivation,
        &fused_params(1.0, 0.5, "relu"),
        &[(&[1.0], &[1, 1, 1]), (&[1.0], &[1, 1, 1]), (&[0.0], &[1])],
        &[1, 1, 1],
    )
    .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn test_bias_shape_checked() {
    let err = run_f32(
        ConvKind::ForwardActivation,
        &fused_params(1.0, 0.0, "none"),
        &[(&[1.0], &[1, 1, 1]), (&[1.0], &[1, 1, 1]), (&[0.0, 0.0], &[2])],
        &[1, 1, 1],
    )
    .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument { .. }));
}

fn invalid_param_cases() -> Vec<(&'static str, Dictionary)> {
    let mut missing = valid_params(1);
    missing.remove("padding_high");
    vec![
        ("unknown key", with(valid_params(1), "winograd", 1i64)),
        ("missing key", missing),
        ("wrong type", with(valid_params(1), "feature_group_count", 1.0f64)),
        ("wrong length", with(valid_params(1), "window_strides", vec![1i64, 1])),
        ("negative padding", with(valid_params(1), "padding_low", vec![-1i64])),
        ("zero stride", with(valid_params(1), "window_strides", vec![0i64])),
        ("zero dilation", with(valid_params(1), "rhs_dilation", vec![0i64])),
        ("zero groups", with(valid_params(1), "feature_group_count", 0i64)),
        ("fusion key on plain kind", with(valid_params(1), "conv_result_scale", 1.0f64)),
    ]
}

#[test]
fn test_invalid_parameters() {
    for (case, params) in invalid_param_cases() {
        let err = run_f32(
            ConvKind::Forward,
            &params,
            &[(&[1.0, 2.0], &[1, 1, 2]), (&[1.0], &[1, 1, 1])],
            &[1, 1, 2],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }), "{case}: {err}");
    }
}

#[test]
fn test_unknown_activation_mode() {
    let err = run_f32(
        ConvKind::ForwardActivation,
        &fused_params(1.0, 0.0, "gelu"),
        &[(&[1.0], &[1, 1, 1]), (&[1.0], &[1, 1, 1]), (&[0.0], &[1])],
        &[1, 1, 1],
    )
    .unwrap_err();

    assert!(err.to_string().contains("gelu"));
}

#[test_case(&[1, 1, 3] ; "result too long")]
#[test_case(&[2, 1, 2] ; "batch mismatch")]
#[test_case(&[1, 2, 2] ; "feature mismatch")]
fn test_inconsistent_result_shape(output_dims: &[usize]) {
    let err = run_f32(
        ConvKind::Forward,
        &valid_params(1),
        &[(&[1.0, 2.0, 3.0], &[1, 1, 3]), (&[1.0, 1.0], &[1, 1, 2])],
        output_dims,
    )
    .unwrap_err();

    assert_eq!(err.code(), StatusCode::InvalidArgument);
}

#[test]
fn test_kernel_larger_than_input() {
    let err = run_f32(
        ConvKind::Forward,
        &valid_params(1),
        &[(&[1.0, 2.0], &[1, 1, 2]), (&[1.0, 1.0, 1.0], &[1, 1, 3])],
        &[1, 1, 1],
    )
    .unwrap_err();

    assert_eq!(err.code(), StatusCode::InvalidArgument);
}

#[test_case(i64::MAX, i64::MAX ; "both sides")]
#[test_case(i64::MAX, 0 ; "low side")]
#[test_case(0, i64::MAX ; "high side")]
fn test_huge_padding_is_rejected(low: i64, high: i64) {
    let params = conv_params(&[1], &[low], &[high], 1);
    let err = run_f32(
        ConvKind::Forward,
        &params,
        &[(&[1.0, 2.0, 3.0], &[1, 1, 3]), (&[1.0], &[1, 1, 1])],
        &[1, 1, 3],
    )
    .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");
}

#[test]
fn test_huge_input_dilation_is_rejected() {
    let params = with(valid_params(1), "lhs_dilation", vec![i64::MAX]);
    let err = run_f32(
        ConvKind::Forward,
        &params,
        &[(&[1.0, 2.0, 3.0], &[1, 1, 3]), (&[1.0, 1.0], &[1, 1, 2])],
        &[1, 1, 2],
    )
    .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");
}

#[test]
fn test_huge_group_count_is_rejected() {
    let mut params = valid_params(1);
    params.insert("feature_group_count".to_string(), ParamValue::from(i64::MAX));
    let params = ConvParams::from_dictionary(&params, ConvKind::Forward, 1).unwrap();

    let err = ConvShape::infer(&[1, 0, 3], &[1, 3, 1], &[1, 1, 3], &params).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");
}

/// Host driver, stream, scratch allocator and poisoned output buffer.
struct Rig {
    driver: Arc<dyn Driver>,
    stream: Stream,
    out: Vec<u8>,
}

impl Rig {
    fn new(output_elements: usize, element_type: ElementType) -> Self {
        Self {
            driver: Arc::new(HostDriver::with_numa_nodes(&[0])),
            stream: Stream::new(0),
            out: vec![POISON; output_elements * element_type.bytes()],
        }
    }

    fn scratch(&self, limit: usize) -> xpu_device::StreamScratchAllocator {
        xpu_device::StreamScratchAllocator::new(self.driver.clone(), &self.stream, limit)
    }

    fn untouched(&self) -> bool {
        self.out.iter().all(|&byte| byte == POISON)
    }
}

#[test]
fn test_missing_input_leaves_output_untouched() {
    let mut rig = Rig::new(3, ElementType::F32);
    let scratch = rig.scratch(1 << 16);
    let x = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let inputs = [BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 4]).unwrap()];

    let mut output = OutputBuffer::new(&mut rig.out, ElementType::F32, &[1, 1, 3]).unwrap();
    let err = dispatch::run_convolution(
        &HostPrimitives,
        &rig.stream,
        &valid_params(1),
        &inputs,
        &mut output,
        &scratch,
        ConvKind::Forward,
    )
    .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument { .. }));
    assert!(rig.untouched());
    // Rejected before submission
    assert_eq!(rig.stream.last_submitted(), 0);
}

#[test]
fn test_mixed_element_types_rejected() {
    let mut rig = Rig::new(3, ElementType::F32);
    let scratch = rig.scratch(1 << 16);
    let x = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let w = vec![0u8; 2 * ElementType::F64.bytes()];
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 4]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F64, &[1, 1, 2]).unwrap(),
    ];

    let mut output = OutputBuffer::new(&mut rig.out, ElementType::F32, &[1, 1, 3]).unwrap();
    let err = dispatch::run_convolution(
        &HostPrimitives,
        &rig.stream,
        &valid_params(1),
        &inputs,
        &mut output,
        &scratch,
        ConvKind::Forward,
    )
    .unwrap_err();

    assert_eq!(err.code(), StatusCode::InvalidArgument);
    assert!(rig.untouched());
}

#[test]
fn test_unsupported_element_type() {
    let mut rig = Rig::new(3, ElementType::F64);
    let scratch = rig.scratch(1 << 16);
    let x = vec![0u8; 4 * ElementType::F64.bytes()];
    let w = vec![0u8; 2 * ElementType::F64.bytes()];
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F64, &[1, 1, 4]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F64, &[1, 1, 2]).unwrap(),
    ];

    let mut output = OutputBuffer::new(&mut rig.out, ElementType::F64, &[1, 1, 3]).unwrap();
    let err = dispatch::run_convolution(
        &HostPrimitives,
        &rig.stream,
        &valid_params(1),
        &inputs,
        &mut output,
        &scratch,
        ConvKind::Forward,
    )
    .unwrap_err();

    assert_eq!(err.code(), StatusCode::Unimplemented);
    assert!(rig.untouched());
    // The submission retired even though the library refused it
    assert_eq!(rig.stream.completed(), 1);
}

#[test]
fn test_scratch_bound_to_other_stream() {
    let mut rig = Rig::new(3, ElementType::F32);
    let other = Stream::new(0);
    let scratch = xpu_device::StreamScratchAllocator::new(rig.driver.clone(), &other, 1 << 16);
    let x = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let w = f32_bytes(&[1.0, 1.0]);
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 4]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F32, &[1, 1, 2]).unwrap(),
    ];

    let mut output = OutputBuffer::new(&mut rig.out, ElementType::F32, &[1, 1, 3]).unwrap();
    let err = dispatch::run_convolution(
        &HostPrimitives,
        &rig.stream,
        &valid_params(1),
        &inputs,
        &mut output,
        &scratch,
        ConvKind::Forward,
    )
    .unwrap_err();

    assert_eq!(err.code(), StatusCode::FailedPrecondition);
    assert!(rig.untouched());
}

#[test]
fn test_scratch_exhausted() {
    let mut rig = Rig::new(3, ElementType::F32);
    let scratch = rig.scratch(8);
    let x = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let w = f32_bytes(&[1.0, 1.0]);
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 4]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F32, &[1, 1, 2]).unwrap(),
    ];

    let mut output = OutputBuffer::new(&mut rig.out, ElementType::F32, &[1, 1, 3]).unwrap();
    let err = dispatch::run_convolution(
        &HostPrimitives,
        &rig.stream,
        &valid_params(1),
        &inputs,
        &mut output,
        &scratch,
        ConvKind::Forward,
    )
    .unwrap_err();

    assert!(matches!(err, Error::ResourceExhausted { .. }));
    assert!(rig.untouched());
    assert_eq!(scratch.allocated(), 0);
}

#[test]
fn test_success_advances_stream() {
    let mut rig = Rig::new(3, ElementType::F32);
    let scratch = rig.scratch(1 << 16);
    let x = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let w = f32_bytes(&[1.0, -1.0]);
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 4]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F32, &[1, 1, 2]).unwrap(),
    ];

    let mut output = OutputBuffer::new(&mut rig.out, ElementType::F32, &[1, 1, 3]).unwrap();
    dispatch::run_convolution(
        &HostPrimitives,
        &rig.stream,
        &valid_params(1),
        &inputs,
        &mut output,
        &scratch,
        ConvKind::Forward,
    )
    .unwrap();

    rig.stream.synchronize().unwrap();
    assert_eq!(rig.stream.completed(), 1);
    assert_eq!(scratch.allocated(), 12);
    assert_eq!(scratch.stream_id(), rig.stream.id());
    assert_eq!(f32_values(&rig.out), [-1.0, -1.0, -1.0]);
}

#[test]
fn test_run_primitive_through_platform() {
    let (_, platform) = host_platform(&[0]);
    let executor = platform.executor_for_device(0).unwrap();
    let stream = executor.create_stream();
    let scratch = executor.scratch_allocator(&stream, 1 << 16);

    let x = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let w = f32_bytes(&[1.0, 1.0]);
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 4]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F32, &[1, 1, 2]).unwrap(),
    ];
    let mut out = vec![0u8; 12];

    let mut output = OutputBuffer::new(&mut out, ElementType::F32, &[1, 1, 3]).unwrap();
    let status = platform.run_primitive("convForward", &stream, &valid_params(1), &inputs, &mut output, &scratch);
    assert!(status.is_ok(), "{status}");
    assert_eq!(f32_values(&out), [3.0, 5.0, 7.0]);
    assert_eq!(executor.dispatch_count(), 1);

    let mut output = OutputBuffer::new(&mut out, ElementType::F32, &[1, 1, 3]).unwrap();
    let status = platform.run_primitive("convWinograd", &stream, &valid_params(1), &inputs, &mut output, &scratch);
    assert_eq!(status.code(), StatusCode::Unimplemented);

    let mut output = OutputBuffer::new(&mut out, ElementType::F32, &[1, 1, 3]).unwrap();
    let status = platform.run_primitive("convForward", &stream, &valid_params(1), &inputs[..1], &mut output, &scratch);
    assert_eq!(status.code(), StatusCode::InvalidArgument);
    assert_eq!(f32_values(&out), [3.0, 5.0, 7.0]);
}

#[test]
fn test_stream_on_other_device() {
    let (_, platform) = host_platform(&[0, 0]);
    let executor = platform.executor_for_device(0).unwrap();
    let foreign = platform.executor_for_device(1).unwrap().create_stream();
    let scratch = executor.scratch_allocator(&foreign, 1 << 16);

    let x = f32_bytes(&[1.0, 2.0]);
    let w = f32_bytes(&[1.0]);
    let inputs = [
        BufferDescriptor::new(&x, ElementType::F32, &[1, 1, 2]).unwrap(),
        BufferDescriptor::new(&w, ElementType::F32, &[1, 1, 1]).unwrap(),
    ];
    let mut out = vec![POISON; 8];

    let mut output = OutputBuffer::new(&mut out, ElementType::F32, &[1, 1, 2]).unwrap();
    let err = executor
        .run_convolution(&foreign, &valid_params(1), &inputs, &mut output, &scratch, ConvKind::Forward)
        .unwrap_err();

    assert!(matches!(err, Error::FailedPrecondition { .. }));
    assert!(out.iter().all(|&byte| byte == POISON));
    assert_eq!(executor.dispatch_count(), 0);
}
