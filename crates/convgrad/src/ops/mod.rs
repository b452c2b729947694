//! Computational primitives

pub mod conv_grad;

pub use conv_grad::{conv2d_backprop_input, conv2d_backprop_input_with_strides};
