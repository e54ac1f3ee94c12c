//! Tensor trait definition

use crate::dtype::DType;
use crate::{Error, Result};

/// Core tensor trait shared by every backend's tensor type.
///
/// The sampling layer never touches tensor data itself; it only inspects
/// shapes and dtypes to derive batch sizes and offsets, and hands tensors
/// to backend ops.
pub trait Tensor: Sized {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }

    /// Size of dimension `axis`.
    ///
    /// # Errors
    /// Returns `InvalidShape` if the tensor has fewer than `axis + 1` dims.
    fn dim(&self, axis: usize) -> Result<usize> {
        self.shape().get(axis).copied().ok_or_else(|| {
            Error::InvalidShape(format!(
                "expected at least {} dims, got shape {:?}",
                axis + 1,
                self.shape()
            ))
        })
    }

    /// Fail unless the tensor holds `expected` elements.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` on mismatch.
    fn expect_dtype(&self, expected: DType) -> Result<()> {
        if self.dtype() == expected {
            Ok(())
        } else {
            Err(Error::DtypeMismatch {
                expected: expected.to_string(),
                got: self.dtype().to_string(),
            })
        }
    }
}
