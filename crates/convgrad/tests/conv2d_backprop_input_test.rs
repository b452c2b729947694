use approx::assert_relative_eq;
use convgrad::{
    conv2d_backprop_input, conv2d_backprop_input_with_strides, permute4, ConvGradError,
    DataLayout, DirectEngine, Padding, PrimitiveCache, Tensor,
};

fn run(
    input_shape: &[usize],
    filter: &Tensor<f32>,
    grad_output: &Tensor<f32>,
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: Padding,
    data_layout: DataLayout,
) -> convgrad::Result<Tensor<f32>> {
    let cache = PrimitiveCache::new();
    let engine = DirectEngine::new();
    conv2d_backprop_input(
        input_shape,
        filter,
        grad_output,
        stride,
        dilation,
        padding,
        data_layout,
        &cache,
        &engine,
    )
}

#[test]
fn test_gradient_check_all_ones_filter() {
    // Forward conv: input [1,4,4,1] NHWC, filter [3,3,1,1] all ones,
    // stride 1, no padding -> output [1,2,2,1]. With grad_output all ones,
    // each input cell receives one contribution per output position whose
    // receptive field covers it.
    //
    // In 1D, input index i is covered by output o and tap k when i = o + k,
    // o in {0,1}, k in {0,1,2}:
    //   i=0: (0,0)                 -> 1
    //   i=1: (0,1),(1,0)           -> 2
    //   i=2: (0,2),(1,1)           -> 2
    //   i=3: (1,2)                 -> 1
    // The 2D result is the outer product [1,2,2,1] x [1,2,2,1].
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();

    let grad_input = run(
        &[1, 4, 4, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Explicit {
            top: 0,
            bottom: 0,
            left: 0,
            right: 0,
        },
        DataLayout::NHWC,
    )
    .unwrap();

    assert_eq!(grad_input.shape().dims(), &[1, 4, 4, 1]);
    #[rustfmt::skip]
    let expected = vec![
        1.0f32, 2.0, 2.0, 1.0,
        2.0,    4.0, 4.0, 2.0,
        2.0,    4.0, 4.0, 2.0,
        1.0,    2.0, 2.0, 1.0,
    ];
    let actual = grad_input.to_vec();
    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_relative_eq!(a, e, epsilon = 1e-6);
        assert!((a - e).abs() < 1e-6, "mismatch at flat index {i}: {a} vs {e}");
    }
}

#[test]
fn test_multi_channel_filter_indexing() {
    // Input [1,2,3,3] NCHW, filter [2,2,2,1] HWIO, stride 1, valid ->
    // output [1,1,2,2] with grad_output [[1,2],[3,4]].
    //
    // Filter taps: in-channel 0 has weight 1 at (kh,kw)=(0,0) only, so its
    // gradient plane is grad_output placed at the top-left:
    //   [[1,2,0],[3,4,0],[0,0,0]]
    // In-channel 1 has weight 1 at (1,1) only, shifting grad_output one
    // step down-right:
    //   [[0,0,0],[0,1,2],[0,3,4]]
    let filter =
        Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], &[2, 2, 2, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[1, 1, 2, 2]).unwrap();

    let grad_input = run(
        &[1, 2, 3, 3],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NCHW,
    )
    .unwrap();

    #[rustfmt::skip]
    let expected = vec![
        // channel 0
        1.0f32, 2.0, 0.0,
        3.0,    4.0, 0.0,
        0.0,    0.0, 0.0,
        // channel 1
        0.0,    0.0, 0.0,
        0.0,    1.0, 2.0,
        0.0,    3.0, 4.0,
    ];
    assert_eq!(grad_input.to_vec(), expected);
}

#[test]
fn test_stride_two_checkerboard() {
    // Input [1,5,5,1], filter [1,1,1,1] identity tap, stride 2, valid ->
    // output 3x3. Only input positions at even (h,w) are ever touched by a
    // receptive field; everything else must stay exactly zero.
    let filter = Tensor::from_vec(vec![1.0f32], &[1, 1, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(
        vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        &[1, 3, 3, 1],
    )
    .unwrap();

    let grad_input = run(
        &[1, 5, 5, 1],
        &filter,
        &grad_output,
        (2, 2),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();

    #[rustfmt::skip]
    let expected = vec![
        1.0f32, 0.0, 2.0, 0.0, 3.0,
        0.0,    0.0, 0.0, 0.0, 0.0,
        4.0,    0.0, 5.0, 0.0, 6.0,
        0.0,    0.0, 0.0, 0.0, 0.0,
        7.0,    0.0, 8.0, 0.0, 9.0,
    ];
    assert_eq!(grad_input.to_vec(), expected);
}

#[test]
fn test_dilated_filter_taps() {
    // Input [1,1,5,1] (1 row, 5 cols), filter [1,2,1,1] = [1, 10] with
    // dilation 2 on width: effective width 3, output width 3.
    // Column i receives tap contributions where i = o + 2k:
    //   i=0: o=0,k=0 -> 1        i=1: o=1,k=0 -> 1
    //   i=2: o=2,k=0 and o=0,k=1 -> 1 + 10 = 11
    //   i=3: o=1,k=1 -> 10       i=4: o=2,k=1 -> 10
    let filter = Tensor::from_vec(vec![1.0f32, 10.0], &[1, 2, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 3], &[1, 1, 3, 1]).unwrap();

    let grad_input = run(
        &[1, 1, 5, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 2),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();

    assert_eq!(grad_input.to_vec(), vec![1.0, 1.0, 11.0, 10.0, 10.0]);
}

#[test]
fn test_same_padding_accumulation() {
    // Input [1,3,3,1], filter [3,3,1,1] all ones, stride 1, Same padding ->
    // output 3x3, pad 1 on every side. With grad_output all ones the 1D tap
    // counts are [2,3,2] (pairs (o,k) with o + k = i + 1), so the result is
    // the outer product [2,3,2] x [2,3,2].
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 9], &[1, 3, 3, 1]).unwrap();

    let grad_input = run(
        &[1, 3, 3, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Same,
        DataLayout::NHWC,
    )
    .unwrap();

    #[rustfmt::skip]
    let expected = vec![
        4.0f32, 6.0, 4.0,
        6.0,    9.0, 6.0,
        4.0,    6.0, 4.0,
    ];
    assert_eq!(grad_input.to_vec(), expected);
}

#[test]
fn test_shape_law_across_configs() {
    let cache = PrimitiveCache::new();
    let engine = DirectEngine::new();

    // (input_shape, filter_shape, grad_output_shape, stride, padding, layout)
    let cases: Vec<(Vec<usize>, Vec<usize>, Vec<usize>, (usize, usize), Padding, DataLayout)> = vec![
        (
            vec![1, 4, 4, 1],
            vec![3, 3, 1, 3],
            vec![1, 2, 2, 3],
            (1, 1),
            Padding::Valid,
            DataLayout::NHWC,
        ),
        (
            vec![2, 6, 6, 3],
            vec![3, 3, 3, 4],
            vec![2, 3, 3, 4],
            (2, 2),
            Padding::Same,
            DataLayout::NHWC,
        ),
        (
            vec![1, 2, 5, 5],
            vec![3, 3, 2, 2],
            vec![1, 2, 5, 5],
            (1, 1),
            Padding::Explicit {
                top: 1,
                bottom: 1,
                left: 1,
                right: 1,
            },
            DataLayout::NCHW,
        ),
    ];

    for (input_shape, filter_shape, grad_output_shape, stride, padding, layout) in cases {
        let filter =
            Tensor::from_vec(vec![0.5f32; filter_shape.iter().product()], &filter_shape).unwrap();
        let grad_output = Tensor::from_vec(
            vec![1.0f32; grad_output_shape.iter().product()],
            &grad_output_shape,
        )
        .unwrap();
        let grad_input = conv2d_backprop_input(
            &input_shape,
            &filter,
            &grad_output,
            stride,
            (1, 1),
            padding,
            layout,
            &cache,
            &engine,
        )
        .unwrap();
        assert_eq!(grad_input.shape().dims(), input_shape.as_slice());
    }
}

#[test]
fn test_degenerate_inputs_zero_fill() {
    // Zero-extent batch: output must exist at input_shape and be all zero.
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::<f32>::zeros(&[0, 2, 2, 1]);
    let grad_input = run(
        &[0, 4, 4, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();
    assert_eq!(grad_input.shape().dims(), &[0, 4, 4, 1]);
    assert!(grad_input.is_empty());

    // Zero-channel filter with a non-empty input shape.
    let empty_filter = Tensor::<f32>::zeros(&[3, 3, 1, 0]);
    let grad_output = Tensor::<f32>::zeros(&[1, 2, 2, 0]);
    let grad_input = run(
        &[1, 4, 4, 1],
        &empty_filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();
    assert_eq!(grad_input.shape().dims(), &[1, 4, 4, 1]);
    assert!(grad_input.to_vec().iter().all(|&v| v == 0.0));
}

#[test]
fn test_cache_reuses_plan_per_config() {
    let cache = PrimitiveCache::new();
    let engine = DirectEngine::new();
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();

    for _ in 0..3 {
        conv2d_backprop_input(
            &[1, 4, 4, 1],
            &filter,
            &grad_output,
            (1, 1),
            (1, 1),
            Padding::Valid,
            DataLayout::NHWC,
            &cache,
            &engine,
        )
        .unwrap();
    }
    assert_eq!(cache.build_count(), 1);

    // A different input extent is a different config and builds a new plan.
    let grad_output_5 = Tensor::from_vec(vec![1.0f32; 9], &[1, 3, 3, 1]).unwrap();
    conv2d_backprop_input(
        &[1, 5, 5, 1],
        &filter,
        &grad_output_5,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
        &cache,
        &engine,
    )
    .unwrap();
    assert_eq!(cache.build_count(), 2);
}

#[test]
fn test_determinism_bit_identical_repeats() {
    let filter_data: Vec<f32> = (0..18).map(|v| (v as f32) * 0.137 - 1.1).collect();
    let grad_data: Vec<f32> = (0..4).map(|v| (v as f32) * 0.731 + 0.3).collect();
    let filter = Tensor::from_vec(filter_data, &[3, 3, 2, 1]).unwrap();
    let grad_output = Tensor::from_vec(grad_data, &[1, 2, 2, 1]).unwrap();

    let first = run(
        &[1, 4, 4, 2],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();
    let second = run(
        &[1, 4, 4, 2],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();
    // Bit-identical, not merely approximately equal.
    assert_eq!(first.to_vec(), second.to_vec());
}

#[test]
fn test_nhwc_and_nchw_agree() {
    // Same logical problem presented in both layouts must produce the same
    // gradient, up to the layout permutation of the result.
    let filter_data: Vec<f32> = (0..8).map(|v| (v as f32) * 0.25 - 0.5).collect();
    let filter = Tensor::from_vec(filter_data, &[2, 2, 2, 1]).unwrap();

    // grad_output has a single channel, so its flat NHWC and NCHW bytes
    // coincide and the same vector serves both calls.
    let grad_data = vec![1.0f32, -2.0, 3.0, 0.5];
    let grad_nhwc = Tensor::from_vec(grad_data.clone(), &[1, 2, 2, 1]).unwrap();
    let grad_nchw = Tensor::from_vec(grad_data, &[1, 1, 2, 2]).unwrap();

    let out_nhwc = run(
        &[1, 3, 3, 2],
        &filter,
        &grad_nhwc,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap();
    let out_nchw = run(
        &[1, 2, 3, 3],
        &filter,
        &grad_nchw,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NCHW,
    )
    .unwrap();

    let nhwc_as_nchw = permute4(&out_nhwc.to_vec(), [1, 3, 3, 2], [0, 3, 1, 2]);
    let nchw_flat = out_nchw.to_vec();
    for (&a, &e) in nhwc_as_nchw.iter().zip(nchw_flat.iter()) {
        assert_relative_eq!(a, e, epsilon = 1e-6);
    }
}

#[test]
fn test_batch_stride_rejected() {
    let cache = PrimitiveCache::new();
    let engine = DirectEngine::new();
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();

    let err = conv2d_backprop_input_with_strides(
        &[1, 4, 4, 1],
        &filter,
        &grad_output,
        [2, 1, 1, 1],
        [1, 1, 1, 1],
        Padding::Valid,
        DataLayout::NHWC,
        &cache,
        &engine,
    )
    .unwrap_err();
    assert!(matches!(err, ConvGradError::InvalidArgument { .. }));

    // Channel dilation is equally unsupported; NHWC keeps channels last.
    let err = conv2d_backprop_input_with_strides(
        &[1, 4, 4, 1],
        &filter,
        &grad_output,
        [1, 1, 1, 1],
        [1, 1, 1, 2],
        Padding::Valid,
        DataLayout::NHWC,
        &cache,
        &engine,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(cache.build_count(), 0);
}

#[test]
fn test_padding_mismatch_rejected() {
    // With zero explicit padding the forward output is 2x2; a 3x3
    // grad_output cannot belong to this configuration.
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 9], &[1, 3, 3, 1]).unwrap();

    let err = run(
        &[1, 4, 4, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Explicit {
            top: 0,
            bottom: 0,
            left: 0,
            right: 0,
        },
        DataLayout::NHWC,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_huge_explicit_padding_rejected() {
    // Padding amounts near usize::MAX must come back as an error, not abort
    // the process with an arithmetic overflow.
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();

    let err = run(
        &[1, 4, 4, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Explicit {
            top: usize::MAX,
            bottom: 1,
            left: 0,
            right: 0,
        },
        DataLayout::NHWC,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_rank_mismatch_rejected() {
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();
    let err = run(
        &[1, 4, 4, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());

    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let err = run(
        &[4, 4, 1],
        &filter,
        &grad_output,
        (1, 1),
        (1, 1),
        Padding::Valid,
        DataLayout::NHWC,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_shared_cache_across_threads() {
    let cache = PrimitiveCache::new();
    let engine = DirectEngine::new();
    let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
    let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let grad_input = conv2d_backprop_input(
                    &[1, 4, 4, 1],
                    &filter,
                    &grad_output,
                    (1, 1),
                    (1, 1),
                    Padding::Valid,
                    DataLayout::NHWC,
                    &cache,
                    &engine,
                )
                .unwrap();
                assert_eq!(grad_input.shape().dims(), &[1, 4, 4, 1]);
            });
        }
    });
    assert_eq!(cache.build_count(), 1);
}
