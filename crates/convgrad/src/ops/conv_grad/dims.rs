//! Dimension resolution for the backward-data pass.
//!
//! Re-derives the forward convolution geometry from the triple
//! (input_shape, filter_shape, grad_output_shape): forward output sizes,
//! and explicit per-side padding when the policy is symbolic. Everything
//! downstream (cache key, compiled plan, engine loops) works from the
//! numbers produced here.

use super::config::{ConvConfig, Padding};
use crate::{ConvGradError, DataLayout, Result, Shape};

const OP: &str = "conv2d_backprop_input";

/// Resolved geometry of one spatial axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialDim {
    pub input_size: usize,
    pub filter_size: usize,
    pub output_size: usize,
    pub stride: usize,
    pub dilation: usize,
    pub pad_low: usize,
    pub pad_high: usize,
}

/// Full backward-data geometry: batch/channel counts plus both spatial axes
/// in (height, width) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvBackpropDims {
    pub batch_size: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub spatial: [SpatialDim; 2],
}

impl ConvBackpropDims {
    pub fn to_config(&self, padding: Padding) -> ConvConfig {
        ConvConfig {
            batch_size: self.batch_size,
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            input_spatial: [self.spatial[0].input_size, self.spatial[1].input_size],
            filter_spatial: [self.spatial[0].filter_size, self.spatial[1].filter_size],
            output_spatial: [self.spatial[0].output_size, self.spatial[1].output_size],
            strides: [self.spatial[0].stride, self.spatial[1].stride],
            dilations: [self.spatial[0].dilation, self.spatial[1].dilation],
            padding_low: [self.spatial[0].pad_low, self.spatial[1].pad_low],
            padding_high: [self.spatial[0].pad_high, self.spatial[1].pad_high],
            padding,
        }
    }
}

/// Forward output size and per-side padding for one spatial axis.
///
/// Dilation enters through the effective filter extent
/// `(filter - 1) * dilation + 1`. For `Same`, any odd padding amount goes to
/// the high side.
pub fn windowed_output_size(
    input_size: usize,
    filter_size: usize,
    stride: usize,
    dilation: usize,
    padding: (usize, usize),
    policy: PaddingAxis,
) -> Result<(usize, usize, usize)> {
    if stride == 0 {
        return Err(ConvGradError::invalid_argument(OP, "stride must be >= 1"));
    }
    if dilation == 0 {
        return Err(ConvGradError::invalid_argument(OP, "dilation must be >= 1"));
    }
    if filter_size == 0 {
        return Err(ConvGradError::invalid_argument(
            OP,
            "filter spatial size must be >= 1",
        ));
    }
    if input_size == 0 {
        return Err(ConvGradError::invalid_argument(
            OP,
            "input spatial size must be >= 1",
        ));
    }

    let overflow = |what: &str| {
        ConvGradError::invalid_argument(OP, format!("{what} overflows usize"))
    };
    let effective_filter = (filter_size - 1)
        .checked_mul(dilation)
        .and_then(|v| v.checked_add(1))
        .ok_or_else(|| overflow("effective filter size"))?;
    match policy {
        PaddingAxis::Same => {
            let output_size = input_size.div_ceil(stride);
            let pad_total = (output_size - 1)
                .checked_mul(stride)
                .and_then(|v| v.checked_add(effective_filter))
                .ok_or_else(|| overflow("padded input size"))?
                .saturating_sub(input_size);
            let pad_low = pad_total / 2;
            let pad_high = pad_total - pad_low;
            Ok((output_size, pad_low, pad_high))
        }
        PaddingAxis::Fixed => {
            let (pad_low, pad_high) = padding;
            let padded = input_size
                .checked_add(pad_low)
                .and_then(|v| v.checked_add(pad_high))
                .ok_or_else(|| overflow("padded input size"))?;
            if padded < effective_filter {
                return Err(ConvGradError::invalid_argument(
                    OP,
                    format!(
                        "computed output size would be non-positive: padded input {} \
                         is smaller than effective filter size {}",
                        padded, effective_filter
                    ),
                ));
            }
            let output_size = (padded - effective_filter) / stride + 1;
            Ok((output_size, pad_low, pad_high))
        }
    }
}

/// Per-axis view of the padding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingAxis {
    /// Padding amounts are known up front (Explicit or Valid)
    Fixed,
    Same,
}

/// Derive the full backward-data geometry and validate it against the shape
/// the upstream gradient actually has.
///
/// `input_shape` and `grad_output_shape` are in `data_layout` order; the
/// filter is HWIO. Batch and channel axes are never strided or dilated here;
/// `stride`/`dilation` cover (height, width) only.
pub fn resolve_backprop_dims(
    input_shape: &Shape,
    filter_shape: &Shape,
    grad_output_shape: &Shape,
    stride: (usize, usize),
    dilation: (usize, usize),
    padding: Padding,
    data_layout: DataLayout,
) -> Result<ConvBackpropDims> {
    if input_shape.rank() != 4 || filter_shape.rank() != 4 || grad_output_shape.rank() != 4 {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!(
                "expected rank-4 input, filter, and grad_output, got ranks {}, {}, {}",
                input_shape.rank(),
                filter_shape.rank(),
                grad_output_shape.rank()
            ),
        ));
    }

    let (batch, in_channels, in_h, in_w) = data_layout.decompose(input_shape.dims());
    let (out_batch, out_channels, out_h, out_w) = data_layout.decompose(grad_output_shape.dims());
    let filter = filter_shape.dims();
    let (filter_h, filter_w) = (filter[0], filter[1]);

    if filter[2] != in_channels {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!(
                "filter in-channels {} does not match input channels {}",
                filter[2], in_channels
            ),
        ));
    }
    if filter[3] != out_channels {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!(
                "filter out-channels {} does not match grad_output channels {}",
                filter[3], out_channels
            ),
        ));
    }
    if out_batch != batch {
        return Err(ConvGradError::invalid_argument(
            OP,
            format!(
                "grad_output batch size {} does not match input batch size {}",
                out_batch, batch
            ),
        ));
    }

    let (axis_policy, pads): (PaddingAxis, [(usize, usize); 2]) = match padding {
        Padding::Explicit {
            top,
            bottom,
            left,
            right,
        } => (PaddingAxis::Fixed, [(top, bottom), (left, right)]),
        Padding::Valid => (PaddingAxis::Fixed, [(0, 0), (0, 0)]),
        Padding::Same => (PaddingAxis::Same, [(0, 0), (0, 0)]),
    };

    let inputs = [in_h, in_w];
    let filters = [filter_h, filter_w];
    let strides = [stride.0, stride.1];
    let dilations = [dilation.0, dilation.1];
    let expected_outputs = [out_h, out_w];

    let mut spatial = [SpatialDim {
        input_size: 0,
        filter_size: 0,
        output_size: 0,
        stride: 1,
        dilation: 1,
        pad_low: 0,
        pad_high: 0,
    }; 2];

    for axis in 0..2 {
        let (output_size, pad_low, pad_high) = windowed_output_size(
            inputs[axis],
            filters[axis],
            strides[axis],
            dilations[axis],
            pads[axis],
            axis_policy,
        )?;
        if output_size == 0 {
            return Err(ConvGradError::invalid_argument(
                OP,
                format!("computed output size for spatial axis {axis} is non-positive"),
            ));
        }
        if output_size != expected_outputs[axis] {
            return Err(ConvGradError::invalid_argument(
                OP,
                format!(
                    "grad_output size {} on spatial axis {} does not match the forward \
                     output size {} implied by input {}, filter {}, stride {}, dilation {}",
                    expected_outputs[axis],
                    axis,
                    output_size,
                    inputs[axis],
                    filters[axis],
                    strides[axis],
                    dilations[axis]
                ),
            ));
        }
        spatial[axis] = SpatialDim {
            input_size: inputs[axis],
            filter_size: filters[axis],
            output_size,
            stride: strides[axis],
            dilation: dilations[axis],
            pad_low,
            pad_high,
        };
    }

    Ok(ConvBackpropDims {
        batch_size: batch,
        in_channels,
        out_channels,
        spatial,
    })
}
