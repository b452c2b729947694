//! Backward-data compute engines.
//!
//! An engine turns a `ConvConfig` into a `CompiledPlan` once (the expensive
//! step the primitive cache amortizes) and then executes the numeric
//! gradient computation against raw buffers any number of times. Plans are
//! immutable after construction, which is what makes sharing them across
//! threads safe.

use super::config::ConvConfig;
use crate::{ConvGradError, DataLayout, FilterLayout, Result};
use num_traits::Float;

const BUILD_OP: &str = "conv2d_backprop_input_plan";
const EXEC_OP: &str = "conv2d_backprop_input_execute";

/// Reusable compute plan for one convolution configuration.
///
/// Owns the resolved descriptor plus the memory layouts the engine wants
/// its filter and grad_output buffers in at execution time. Created once
/// per distinct config, then shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPlan {
    config: ConvConfig,
    filter_layout: FilterLayout,
    data_layout: DataLayout,
    input_elements: usize,
    filter_elements: usize,
    output_elements: usize,
}

impl CompiledPlan {
    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    /// Layout the engine wants the filter buffer in
    pub fn preferred_filter_layout(&self) -> FilterLayout {
        self.filter_layout
    }

    /// Layout the engine wants grad_output in; grad_input is produced in
    /// the same layout
    pub fn preferred_data_layout(&self) -> DataLayout {
        self.data_layout
    }

    pub fn input_elements(&self) -> usize {
        self.input_elements
    }

    pub fn filter_elements(&self) -> usize {
        self.filter_elements
    }

    pub fn output_elements(&self) -> usize {
        self.output_elements
    }
}

/// A backward-data implementation.
///
/// Variant engines (reference loops, blocked/SIMD, external BLAS) implement
/// this trait and are selected at configuration time by the caller; the
/// façade and cache only ever talk to the trait.
pub trait BackwardDataEngine: Send + Sync {
    /// Solve the layout-selection problem for `config` and return a
    /// reusable plan. Unsupported or inconsistent configurations fail here
    /// with `ComputationAborted`, before any buffer is touched.
    fn build_plan(&self, config: &ConvConfig) -> Result<CompiledPlan>;

    /// Run the gradient computation synchronously.
    ///
    /// `filter` and `grad_output` must already be in the plan's preferred
    /// layouts; `grad_input` is written in the plan's data layout. The
    /// borrows end with the call; no engine retains buffer references.
    fn execute<T: Float>(
        &self,
        plan: &CompiledPlan,
        grad_input: &mut [T],
        filter: &[T],
        grad_output: &[T],
    ) -> Result<()>;
}

/// Direct scatter-loop engine.
///
/// Computes the transposed convolution by walking every grad_output element
/// and scattering it through the filter taps into grad_input. Loop order is
/// fixed, so accumulation order (and therefore floating-point rounding) is
/// deterministic for fixed inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectEngine;

impl DirectEngine {
    pub fn new() -> Self {
        Self
    }
}

impl BackwardDataEngine for DirectEngine {
    fn build_plan(&self, config: &ConvConfig) -> Result<CompiledPlan> {
        for axis in 0..2 {
            let padded = config.input_spatial[axis]
                .checked_add(config.padding_low[axis])
                .and_then(|v| v.checked_add(config.padding_high[axis]));
            let consistent = match (padded, config.effective_filter(axis)) {
                (Some(padded), Some(effective)) => {
                    config.strides[axis] >= 1
                        && padded >= effective
                        && (padded - effective) / config.strides[axis] + 1
                            == config.output_spatial[axis]
                }
                _ => false,
            };
            if !consistent {
                return Err(ConvGradError::aborted(
                    BUILD_OP,
                    format!(
                        "configuration is inconsistent on spatial axis {axis}: output size \
                         {} cannot be produced from input {}, filter {}, stride {}, \
                         dilation {}, padding {}+{}",
                        config.output_spatial[axis],
                        config.input_spatial[axis],
                        config.filter_spatial[axis],
                        config.strides[axis],
                        config.dilations[axis],
                        config.padding_low[axis],
                        config.padding_high[axis]
                    ),
                ));
            }
        }

        let overflow =
            || ConvGradError::aborted(BUILD_OP, "tensor element count overflows usize");
        let input_elements = config.input_elements().ok_or_else(overflow)?;
        let filter_elements = config.filter_elements().ok_or_else(overflow)?;
        let output_elements = config.output_elements().ok_or_else(overflow)?;

        // Layout selection: with OIHW all taps for one output channel form
        // one contiguous [ic, kh, kw] block, which matches the loop nest
        // below; grad_output and grad_input are walked plane by plane, which
        // wants channels-first.
        Ok(CompiledPlan {
            config: config.clone(),
            filter_layout: FilterLayout::OIHW,
            data_layout: DataLayout::NCHW,
            input_elements,
            filter_elements,
            output_elements,
        })
    }

    fn execute<T: Float>(
        &self,
        plan: &CompiledPlan,
        grad_input: &mut [T],
        filter: &[T],
        grad_output: &[T],
    ) -> Result<()> {
        if grad_input.len() != plan.input_elements() {
            return Err(ConvGradError::aborted(
                EXEC_OP,
                format!(
                    "grad_input buffer holds {} elements, plan expects {}",
                    grad_input.len(),
                    plan.input_elements()
                ),
            ));
        }
        if filter.len() != plan.filter_elements() {
            return Err(ConvGradError::aborted(
                EXEC_OP,
                format!(
                    "filter buffer holds {} elements, plan expects {}",
                    filter.len(),
                    plan.filter_elements()
                ),
            ));
        }
        if grad_output.len() != plan.output_elements() {
            return Err(ConvGradError::aborted(
                EXEC_OP,
                format!(
                    "grad_output buffer holds {} elements, plan expects {}",
                    grad_output.len(),
                    plan.output_elements()
                ),
            ));
        }

        let config = plan.config();
        let (batch, in_c, out_c) = (config.batch_size, config.in_channels, config.out_channels);
        let [in_h, in_w] = config.input_spatial;
        let [filter_h, filter_w] = config.filter_spatial;
        let [out_h, out_w] = config.output_spatial;
        let [stride_h, stride_w] = config.strides;
        let [dilation_h, dilation_w] = config.dilations;
        let [pad_top, pad_left] = config.padding_low;

        for v in grad_input.iter_mut() {
            *v = T::zero();
        }

        // Scatter: every output position pushes its gradient through each
        // filter tap back to the input position that fed it in the forward
        // pass. Input positions outside the un-padded region are dropped,
        // which is what crops the oversized correlation result.
        let filter_block = in_c * filter_h * filter_w;
        for b in 0..batch {
            for oc in 0..out_c {
                let filter_oc = &filter[oc * filter_block..(oc + 1) * filter_block];
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let g = grad_output[((b * out_c + oc) * out_h + oh) * out_w + ow];
                        for kh in 0..filter_h {
                            let ih = oh * stride_h + kh * dilation_h;
                            if ih < pad_top || ih - pad_top >= in_h {
                                continue;
                            }
                            let ih = ih - pad_top;
                            for kw in 0..filter_w {
                                let iw = ow * stride_w + kw * dilation_w;
                                if iw < pad_left || iw - pad_left >= in_w {
                                    continue;
                                }
                                let iw = iw - pad_left;
                                for ic in 0..in_c {
                                    let w = filter_oc[(ic * filter_h + kh) * filter_w + kw];
                                    let idx = ((b * in_c + ic) * in_h + ih) * in_w + iw;
                                    grad_input[idx] = grad_input[idx] + g * w;
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
