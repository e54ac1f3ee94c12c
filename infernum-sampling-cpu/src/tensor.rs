//! CPU tensor implementation.

use infernum_sampling::dtype::{DType, LogitDType, TensorDType};
use infernum_sampling::tensor::Tensor;
use infernum_sampling::{Error, Result};

/// A host-resident tensor.
///
/// Storage is a `Vec<u64>` so every typed view is suitably aligned for any
/// supported element type.
#[derive(Clone, Debug)]
pub struct CpuTensor {
    data: Vec<u64>,
    shape: Vec<usize>,
    dtype: DType,
}

pub(crate) fn words_for(bytes: usize) -> usize {
    bytes.div_ceil(8)
}

impl CpuTensor {
    /// Create a tensor holding a copy of `data`.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    #[must_use]
    pub fn from_slice<E: TensorDType>(shape: &[usize], data: &[E]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        let mut tensor = Self::zeros(shape, E::DTYPE);
        let bytes: &[u8] = bytemuck::cast_slice(data);
        tensor.bytes_mut().copy_from_slice(bytes);
        tensor
    }

    /// Create an f32 tensor, converting to the logits element type `T`.
    #[must_use]
    pub fn from_f32_as<T: LogitDType>(shape: &[usize], data: &[f32]) -> Self {
        let converted: Vec<T> = data.iter().map(|&v| T::from_f32(v)).collect();
        Self::from_slice(shape, &converted)
    }

    /// Boolean flags stored one byte each.
    #[must_use]
    pub fn from_bools(shape: &[usize], data: &[bool]) -> Self {
        let bytes: Vec<u8> = data.iter().map(|&b| u8::from(b)).collect();
        Self::from_slice(shape, &bytes)
    }

    /// A single host `i32`, as used for `step` and `ite`.
    #[must_use]
    pub fn scalar_i32(value: i32) -> Self {
        Self::from_slice(&[1], &[value])
    }

    /// Create a zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            data: vec![0u64; words_for(numel * dtype.size_in_bytes())],
            shape: shape.to_vec(),
            dtype,
        }
    }

    fn bytes(&self) -> &[u8] {
        let len = self.size_in_bytes();
        &bytemuck::cast_slice::<u64, u8>(&self.data)[..len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.size_in_bytes();
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.data)[..len]
    }

    /// Typed view of the elements.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` unless `E` matches the tensor's dtype.
    pub fn as_slice<E: TensorDType>(&self) -> Result<&[E]> {
        self.expect_dtype(E::DTYPE)?;
        bytemuck::try_cast_slice(self.bytes()).map_err(|e| Error::Other(e.to_string()))
    }

    /// Mutable typed view of the elements.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` unless `E` matches the tensor's dtype.
    pub fn as_slice_mut<E: TensorDType>(&mut self) -> Result<&mut [E]> {
        self.expect_dtype(E::DTYPE)?;
        bytemuck::try_cast_slice_mut(self.bytes_mut()).map_err(|e| Error::Other(e.to_string()))
    }

    /// Copy the elements out.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` unless `E` matches the tensor's dtype.
    pub fn to_vec<E: TensorDType>(&self) -> Result<Vec<E>> {
        Ok(self.as_slice::<E>()?.to_vec())
    }

    /// Copy float elements out as f32, converting from f16/bf16.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` for non-float tensors.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.dtype {
            DType::F32 => self.to_vec::<f32>(),
            DType::F16 => Ok(self
                .as_slice::<half::f16>()?
                .iter()
                .map(|v| v.to_f32())
                .collect()),
            DType::BF16 => Ok(self
                .as_slice::<half::bf16>()?
                .iter()
                .map(|v| v.to_f32())
                .collect()),
            other => Err(Error::DtypeMismatch {
                expected: "float".into(),
                got: other.to_string(),
            }),
        }
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice() {
        let t = CpuTensor::from_slice(&[2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_odd_sized_storage() {
        let t = CpuTensor::from_bools(&[3], &[true, false, true]);
        assert_eq!(t.dtype(), DType::Bool);
        assert_eq!(t.as_slice::<u8>().unwrap(), &[1, 0, 1]);
    }

    #[test]
    fn test_dtype_checked_views() {
        let t = CpuTensor::scalar_i32(7);
        assert_eq!(t.as_slice::<i32>().unwrap(), &[7]);
        assert!(matches!(
            t.as_slice::<f32>(),
            Err(Error::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn test_half_round_trip_to_f32() {
        let t = CpuTensor::from_f32_as::<half::f16>(&[2], &[0.5, -2.0]);
        assert_eq!(t.dtype(), DType::F16);
        assert_eq!(t.to_f32_vec().unwrap(), vec![0.5, -2.0]);
    }

    #[test]
    fn test_zeros_mut() {
        let mut t = CpuTensor::zeros(&[2, 2], DType::I32);
        t.as_slice_mut::<i32>().unwrap()[3] = 9;
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![0, 0, 0, 9]);
    }
}
