//! 2-D convolution backward-data pass.
//!
//! Given the shape of the original convolution input, the filter, and the
//! gradient flowing back from the convolution output, computes the gradient
//! with respect to the input. The per-invocation pipeline is:
//! validate shapes, short-circuit degenerate inputs with a zero tensor,
//! resolve the forward geometry, fetch or build the compiled plan, adapt
//! buffer layouts, run the engine, and return the freshly allocated result.

mod cache;
mod config;
mod dims;
mod engine;

pub use cache::PrimitiveCache;
pub use config::{ConvConfig, Padding};
pub use dims::{resolve_backprop_dims, ConvBackpropDims, SpatialDim};
pub use engine::{BackwardDataEngine, CompiledPlan, DirectEngine};

use crate::layout::{adapt_activation, adapt_filter, permute4, FilterLayout};
use crate::{ConvGradError, DataLayout, Result, Shape, Tensor};
use num_traits::Float;

const OP: &str = "conv2d_backprop_input";

/// Compute the gradient of a 2-D convolution with respect to its input.
///
/// `input_shape` and `grad_output` are rank 4 in `data_layout` order; the
/// filter is rank 4 in HWIO order. `stride` and `dilation` apply to the
/// spatial axes (height, width) only. The result always has exactly
/// `input_shape`.
///
/// If any of the three inputs has zero elements the result is an all-zero
/// tensor of `input_shape`, without touching the resolver, cache, or engine.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_backprop_input<T, E>(
    input_shape: &[usize],
    filter: &Tensor<T>,
    grad_output: &Tensor<T>,
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: Padding,
    data_layout: DataLayout,
    cache: &PrimitiveCache,
    engine: &E,
) -> Result<Tensor<T>>
where
    T: Float,
    E: BackwardDataEngine,
{
    if input_shape.len() != 4 {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!("input_shape must have rank 4, got {}", input_shape.len()),
        ));
    }
    if filter.rank() != 4 {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!("filter must have rank 4, got {}", filter.rank()),
        ));
    }
    if grad_output.rank() != 4 {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!("grad_output must have rank 4, got {}", grad_output.rank()),
        ));
    }

    // Degenerate fast path: a zero-element input, filter, or gradient means
    // every gradient contribution is empty, so the result is defined to be
    // all zeros at the input shape.
    let input_elements: usize = input_shape.iter().product();
    if input_elements == 0 || filter.is_empty() || grad_output.is_empty() {
        return Ok(Tensor::zeros(input_shape));
    }

    let input_shape = Shape::from_slice(input_shape);
    let resolved = resolve_backprop_dims(
        &input_shape,
        filter.shape(),
        grad_output.shape(),
        stride,
        dilation,
        padding,
        data_layout,
    )?;
    let config = resolved.to_config(padding);
    let plan = cache.get_or_build(&config, engine)?;

    let filter_data = filter.as_slice().ok_or_else(|| {
        ConvGradError::invalid_argument(OP, "filter buffer is not contiguous")
    })?;
    let grad_output_data = grad_output.as_slice().ok_or_else(|| {
        ConvGradError::invalid_argument(OP, "grad_output buffer is not contiguous")
    })?;

    // Reorder into the plan's preferred layouts. When a layout already
    // matches, the borrowed buffer passes straight through; otherwise the
    // scratch copy lives only for the rest of this call.
    let filter_dims = to_dims4(filter.shape().dims());
    let adapted_filter = adapt_filter(
        filter_data,
        filter_dims,
        FilterLayout::HWIO,
        plan.preferred_filter_layout(),
    );
    let grad_output_dims = to_dims4(grad_output.shape().dims());
    let adapted_grad_output = adapt_activation(
        grad_output_data,
        grad_output_dims,
        data_layout,
        plan.preferred_data_layout(),
    );

    let mut grad_input = vec![T::zero(); plan.input_elements()];
    engine.execute(
        &plan,
        &mut grad_input,
        adapted_filter.as_ref(),
        adapted_grad_output.as_ref(),
    )?;

    // The engine produced grad_input in its own data layout; bring it back
    // to the caller's layout only when the two differ.
    let internal_dims = plan.preferred_data_layout().compose(
        config.batch_size,
        config.in_channels,
        config.input_spatial[0],
        config.input_spatial[1],
    );
    let result = match plan.preferred_data_layout().to_permutation(data_layout) {
        Some(perm) => permute4(&grad_input, internal_dims, perm),
        None => grad_input,
    };

    Tensor::from_vec(result, input_shape.dims())
}

/// Backward-data entry point taking rank-4 stride and dilation vectors in
/// `data_layout` order, the way the op attributes arrive from a graph.
///
/// The batch and channel axes of a convolution are never strided or
/// dilated; non-unit values there are rejected.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_backprop_input_with_strides<T, E>(
    input_shape: &[usize],
    filter: &Tensor<T>,
    grad_output: &Tensor<T>,
    strides: [usize; 4],
    dilations: [usize; 4],
    padding: Padding,
    data_layout: DataLayout,
    cache: &PrimitiveCache,
    engine: &E,
) -> Result<Tensor<T>>
where
    T: Float,
    E: BackwardDataEngine,
{
    let batch_axis = data_layout.batch_axis();
    let channel_axis = data_layout.channel_axis();
    if strides[batch_axis] != 1 || strides[channel_axis] != 1 {
        return Err(ConvGradError::invalid_argument(
            OP,
            "strides in the batch and channel dimensions are not supported",
        ));
    }
    if dilations[batch_axis] != 1 || dilations[channel_axis] != 1 {
        return Err(ConvGradError::invalid_argument(
            OP,
            "dilations in the batch and channel dimensions are not supported",
        ));
    }

    let stride = (
        strides[data_layout.height_axis()],
        strides[data_layout.width_axis()],
    );
    let dilation = (
        dilations[data_layout.height_axis()],
        dilations[data_layout.width_axis()],
    );
    conv2d_backprop_input(
        input_shape,
        filter,
        grad_output,
        stride,
        dilation,
        padding,
        data_layout,
        cache,
        engine,
    )
}

fn to_dims4(dims: &[usize]) -> [usize; 4] {
    [dims[0], dims[1], dims[2], dims[3]]
}
