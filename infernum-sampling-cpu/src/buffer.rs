//! Untyped host allocations standing in for device memory.

use infernum_sampling::backend::DeviceBuffer;
use infernum_sampling::{Error, Result};

use crate::tensor::words_for;

/// An exact-size byte allocation with typed views.
#[derive(Debug)]
pub struct CpuBuffer {
    data: Vec<u64>,
    bytes: usize,
}

impl CpuBuffer {
    pub(crate) fn new(bytes: usize) -> Self {
        Self {
            data: vec![0u64; words_for(bytes)],
            bytes,
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.data)[..self.bytes]
    }

    /// The buffer viewed as whole `E` elements; trailing bytes are ignored.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be viewed as `E`.
    pub fn as_slice<E: bytemuck::Pod>(&self) -> Result<&[E]> {
        let len = self.bytes / std::mem::size_of::<E>() * std::mem::size_of::<E>();
        let bytes: &[u8] = bytemuck::cast_slice(&self.data);
        bytemuck::try_cast_slice(&bytes[..len]).map_err(|e| Error::Other(e.to_string()))
    }

    /// Mutable counterpart of [`as_slice`](Self::as_slice).
    ///
    /// # Errors
    /// Returns an error if the storage cannot be viewed as `E`.
    pub fn as_slice_mut<E: bytemuck::Pod>(&mut self) -> Result<&mut [E]> {
        let len = self.bytes / std::mem::size_of::<E>() * std::mem::size_of::<E>();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.data);
        bytemuck::try_cast_slice_mut(&mut bytes[..len]).map_err(|e| Error::Other(e.to_string()))
    }
}

impl DeviceBuffer for CpuBuffer {
    fn size_in_bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_cover_whole_elements() {
        let mut buf = CpuBuffer::new(10);
        assert_eq!(buf.size_in_bytes(), 10);
        assert_eq!(buf.as_slice::<u32>().unwrap().len(), 2);
        assert_eq!(buf.as_slice::<u8>().unwrap().len(), 10);
        buf.as_slice_mut::<f32>().unwrap()[1] = 1.5;
        assert_eq!(buf.as_slice::<f32>().unwrap()[1], 1.5);
    }

    #[test]
    fn test_zero_sized() {
        let buf = CpuBuffer::new(0);
        assert!(buf.as_slice::<u64>().unwrap().is_empty());
    }
}
