//! Dense CPU tensor used at the boundary of the backward-data primitive.
//!
//! Storage is a flat, contiguous `ndarray::ArrayD` in row-major order. The
//! interpretation of the axes (NCHW vs NHWC, HWIO for filters) is carried
//! separately by the caller; this type only owns data and a shape.

use crate::{ConvGradError, Result, Shape};
use ndarray::{ArrayD, IxDyn};
use num_traits::Zero;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    data: ArrayD<T>,
    shape: Shape,
}

impl<T: Clone> Tensor<T> {
    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Self
    where
        T: Zero,
    {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
            shape: Shape::from_slice(shape),
        }
    }

    /// Create a tensor from a flat data vector with the specified shape
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ConvGradError::invalid_argument(
                "tensor_from_vec",
                format!(
                    "data length {} does not match shape {:?} ({} elements)",
                    data.len(),
                    shape,
                    expected
                ),
            ));
        }
        let data = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| ConvGradError::invalid_argument("tensor_from_vec", e.to_string()))?;
        Ok(Self {
            shape: Shape::from_slice(shape),
            data,
        })
    }

    /// Create a tensor from an existing ndarray
    pub fn from_array(array: ArrayD<T>) -> Self {
        let shape = Shape::from_slice(array.shape());
        Self { data: array, shape }
    }

    /// Get the value at a specific index
    pub fn get(&self, index: &[usize]) -> Option<T> {
        self.data.get(index).cloned()
    }

    /// Copy the tensor contents into a flat row-major vector
    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

impl<T> Tensor<T> {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elements(&self) -> usize {
        self.shape.elements()
    }

    /// Check if the tensor has no elements
    pub fn is_empty(&self) -> bool {
        self.shape.elements() == 0
    }

    /// Borrow the underlying row-major data.
    ///
    /// Tensors built through this crate's constructors are always standard
    /// layout, so the slice view cannot fail for them.
    pub fn as_slice(&self) -> Option<&[T]> {
        self.data.as_slice()
    }

    pub fn array(&self) -> &ArrayD<T> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_shape_and_content() {
        let t = Tensor::<f32>::zeros(&[2, 3]);
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.elements(), 6);
        assert!(t.to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_vec_roundtrip() {
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.get(&[1, 0]), Some(3.0));
        assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.as_slice().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let err = Tensor::from_vec(vec![1.0f32; 5], &[2, 2]).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_empty_tensor() {
        let t = Tensor::<f32>::zeros(&[0, 3, 3, 2]);
        assert!(t.is_empty());
        assert_eq!(t.rank(), 4);
    }
}
