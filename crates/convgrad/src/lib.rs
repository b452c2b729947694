//! 2-D convolution backward-data primitive.
//!
//! This crate computes the gradient of a 2-D convolution with respect to its
//! input tensor, given the filter and the gradient flowing back from the
//! convolution output. It is a library-level building block for a larger
//! execution engine: one synchronous function call per gradient tensor,
//! with a primitive cache that amortizes per-configuration setup cost
//! across invocations.
//!
//! ```
//! use convgrad::{
//!     conv2d_backprop_input, DataLayout, DirectEngine, Padding, PrimitiveCache, Tensor,
//! };
//!
//! let cache = PrimitiveCache::new();
//! let engine = DirectEngine::new();
//!
//! // Forward conv: input [1,4,4,1] NHWC, filter [3,3,1,1] HWIO, valid padding.
//! let filter = Tensor::from_vec(vec![1.0f32; 9], &[3, 3, 1, 1]).unwrap();
//! let grad_output = Tensor::from_vec(vec![1.0f32; 4], &[1, 2, 2, 1]).unwrap();
//!
//! let grad_input = conv2d_backprop_input(
//!     &[1, 4, 4, 1],
//!     &filter,
//!     &grad_output,
//!     (1, 1),
//!     (1, 1),
//!     Padding::Valid,
//!     DataLayout::NHWC,
//!     &cache,
//!     &engine,
//! )
//! .unwrap();
//! assert_eq!(grad_input.shape().dims(), &[1, 4, 4, 1]);
//! ```

pub mod error;
pub mod layout;
pub mod ops;
pub mod shape;
pub mod tensor;

pub use error::{ConvGradError, Result};
pub use layout::{adapt_activation, adapt_filter, permute4, DataLayout, FilterLayout};
pub use ops::conv_grad::{
    conv2d_backprop_input, conv2d_backprop_input_with_strides, resolve_backprop_dims,
    BackwardDataEngine, CompiledPlan, ConvBackpropDims, ConvConfig, DirectEngine, Padding,
    PrimitiveCache, SpatialDim,
};
pub use shape::Shape;
pub use tensor::Tensor;
