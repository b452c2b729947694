//! Data layout handling for activations and filters.
//!
//! The rest of the system hands tensors over in a "natural" row-major layout
//! (NHWC or NCHW for activations, HWIO for filters). A compiled plan declares
//! the layouts its engine wants at execution time; the adapter functions here
//! reorder data into the preferred layout when the two differ and pass the
//! original buffer through untouched when they already match.

use std::borrow::Cow;

/// Activation tensor layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLayout {
    /// Channels first: [N, C, H, W]
    NCHW,
    /// Channels last: [N, H, W, C]
    NHWC,
}

impl DataLayout {
    pub fn batch_axis(&self) -> usize {
        0
    }

    pub fn channel_axis(&self) -> usize {
        match self {
            DataLayout::NCHW => 1,
            DataLayout::NHWC => 3,
        }
    }

    pub fn height_axis(&self) -> usize {
        match self {
            DataLayout::NCHW => 2,
            DataLayout::NHWC => 1,
        }
    }

    pub fn width_axis(&self) -> usize {
        match self {
            DataLayout::NCHW => 3,
            DataLayout::NHWC => 2,
        }
    }

    /// Permutation of source axes that converts this layout to `target`.
    /// `None` means no movement is required.
    pub fn to_permutation(&self, target: DataLayout) -> Option<[usize; 4]> {
        match (self, target) {
            (DataLayout::NCHW, DataLayout::NHWC) => Some([0, 2, 3, 1]),
            (DataLayout::NHWC, DataLayout::NCHW) => Some([0, 3, 1, 2]),
            _ => None,
        }
    }

    /// Split a shape given in this layout into (batch, channels, height, width)
    pub fn decompose(&self, dims: &[usize]) -> (usize, usize, usize, usize) {
        (
            dims[self.batch_axis()],
            dims[self.channel_axis()],
            dims[self.height_axis()],
            dims[self.width_axis()],
        )
    }

    /// Assemble (batch, channels, height, width) into a shape in this layout
    pub fn compose(&self, batch: usize, channels: usize, height: usize, width: usize) -> [usize; 4] {
        let mut dims = [0; 4];
        dims[self.batch_axis()] = batch;
        dims[self.channel_axis()] = channels;
        dims[self.height_axis()] = height;
        dims[self.width_axis()] = width;
        dims
    }
}

/// Filter tensor layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterLayout {
    /// [filter_height, filter_width, in_channels, out_channels], the natural
    /// order filters arrive in
    HWIO,
    /// [out_channels, in_channels, filter_height, filter_width]
    OIHW,
}

impl FilterLayout {
    pub fn to_permutation(&self, target: FilterLayout) -> Option<[usize; 4]> {
        match (self, target) {
            (FilterLayout::HWIO, FilterLayout::OIHW) => Some([3, 2, 0, 1]),
            (FilterLayout::OIHW, FilterLayout::HWIO) => Some([2, 3, 1, 0]),
            _ => None,
        }
    }
}

/// Reorder a flat row-major rank-4 buffer by the given axis permutation.
///
/// `dims` describes `src`; the result is row-major over the permuted dims.
/// Pure data movement: element values are untouched and the output for a
/// given (dims, perm) pair is always identical.
pub fn permute4<T: Copy>(src: &[T], dims: [usize; 4], perm: [usize; 4]) -> Vec<T> {
    debug_assert_eq!(src.len(), dims.iter().product::<usize>());

    let src_strides = [
        dims[1] * dims[2] * dims[3],
        dims[2] * dims[3],
        dims[3],
        1,
    ];
    let out_dims = [dims[perm[0]], dims[perm[1]], dims[perm[2]], dims[perm[3]]];
    let out_strides = [
        src_strides[perm[0]],
        src_strides[perm[1]],
        src_strides[perm[2]],
        src_strides[perm[3]],
    ];

    let mut dst = Vec::with_capacity(src.len());
    for a in 0..out_dims[0] {
        for b in 0..out_dims[1] {
            for c in 0..out_dims[2] {
                for d in 0..out_dims[3] {
                    let idx = a * out_strides[0]
                        + b * out_strides[1]
                        + c * out_strides[2]
                        + d * out_strides[3];
                    dst.push(src[idx]);
                }
            }
        }
    }
    dst
}

/// Bring an activation buffer into the layout a plan requires.
///
/// Zero copies when the layouts already match; otherwise a call-scoped
/// scratch buffer is allocated and filled.
pub fn adapt_activation<'a, T: Copy>(
    data: &'a [T],
    dims: [usize; 4],
    from: DataLayout,
    to: DataLayout,
) -> Cow<'a, [T]> {
    match from.to_permutation(to) {
        None => Cow::Borrowed(data),
        Some(perm) => Cow::Owned(permute4(data, dims, perm)),
    }
}

/// Bring a filter buffer into the layout a plan requires.
pub fn adapt_filter<'a, T: Copy>(
    data: &'a [T],
    dims: [usize; 4],
    from: FilterLayout,
    to: FilterLayout,
) -> Cow<'a, [T]> {
    match from.to_permutation(to) {
        None => Cow::Borrowed(data),
        Some(perm) => Cow::Owned(permute4(data, dims, perm)),
    }
}
