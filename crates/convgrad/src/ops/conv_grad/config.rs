//! Canonical description of a convolution configuration.
//!
//! A `ConvConfig` fully determines the backward-data computation: once two
//! calls agree on every field they can share one compiled plan, so the
//! config doubles as the primitive-cache key.

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Padding policy for the forward convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Padding {
    /// Explicit per-side amounts
    Explicit {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    },
    /// Output size is ceil(input / stride); padding derived per axis, with
    /// any odd amount going to the high side
    Same,
    /// No padding
    Valid,
}

impl Padding {
    fn tag(&self) -> &'static str {
        match self {
            Padding::Explicit { .. } => "explicit",
            Padding::Same => "same",
            Padding::Valid => "valid",
        }
    }
}

/// Immutable description of one backward-data configuration.
///
/// Spatial vectors are ordered (height, width). Padding amounts are the
/// resolved per-axis values, so a `Same` policy and an `Explicit` policy
/// that happen to produce the same numbers still key differently through
/// the `padding` field, matching memberwise equality.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct ConvConfig {
    pub batch_size: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub input_spatial: [usize; 2],
    pub filter_spatial: [usize; 2],
    pub output_spatial: [usize; 2],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub padding_low: [usize; 2],
    pub padding_high: [usize; 2],
    pub padding: Padding,
}

impl ConvConfig {
    /// Effective filter extent on one axis after dilation; `None` when the
    /// filter size is zero or the extent overflows
    pub fn effective_filter(&self, axis: usize) -> Option<usize> {
        self.filter_spatial[axis]
            .checked_sub(1)?
            .checked_mul(self.dilations[axis])?
            .checked_add(1)
    }

    pub fn input_elements(&self) -> Option<usize> {
        self.batch_size
            .checked_mul(self.in_channels)?
            .checked_mul(self.input_spatial[0])?
            .checked_mul(self.input_spatial[1])
    }

    pub fn filter_elements(&self) -> Option<usize> {
        self.filter_spatial[0]
            .checked_mul(self.filter_spatial[1])?
            .checked_mul(self.in_channels)?
            .checked_mul(self.out_channels)
    }

    pub fn output_elements(&self) -> Option<usize> {
        self.batch_size
            .checked_mul(self.out_channels)?
            .checked_mul(self.output_spatial[0])?
            .checked_mul(self.output_spatial[1])
    }

    /// Canonical cache key: every field serialized in a fixed order with a
    /// field delimiter, so distinct configs can never collide.
    pub fn cache_key(&self) -> String {
        let mut key = String::from("conv2d_bwd_input");
        let mut add = |field: &str| {
            key.push(':');
            key.push_str(field);
        };
        add(&self.batch_size.to_string());
        add(&self.in_channels.to_string());
        add(&self.out_channels.to_string());
        add(&dims_key(&self.input_spatial));
        add(&dims_key(&self.filter_spatial));
        add(&dims_key(&self.output_spatial));
        add(&dims_key(&self.strides));
        add(&dims_key(&self.dilations));
        add(&dims_key(&self.padding_low));
        add(&dims_key(&self.padding_high));
        add(self.padding.tag());
        key
    }
}

fn dims_key(dims: &[usize]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}
