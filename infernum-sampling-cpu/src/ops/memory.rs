//! AllocatorOps and TransferOps implementations for CpuBackend.

use std::sync::atomic::Ordering;

use infernum_sampling::backend::{AllocatorOps, DeviceBuffer, TransferOps};
use infernum_sampling::dtype::DType;
use infernum_sampling::tensor::Tensor;
use infernum_sampling::{Error, Result};

use crate::buffer::CpuBuffer;
use crate::tensor::CpuTensor;
use crate::CpuBackend;

impl AllocatorOps for CpuBackend {
    fn realloc(&self, buffer: Option<CpuBuffer>, bytes: usize) -> Result<CpuBuffer> {
        if let Some(buffer) = buffer {
            if buffer.size_in_bytes() == bytes {
                return Ok(buffer);
            }
            self.free(buffer);
        }

        let live = self.counters.live_bytes.load(Ordering::Relaxed);
        if let Some(limit) = self.memory_limit {
            if live + bytes > limit {
                return Err(Error::Alloc(format!(
                    "cannot allocate {bytes} bytes: {live} of {limit} in use"
                )));
            }
        }
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        self.counters.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(CpuBuffer::new(bytes))
    }

    fn free(&self, buffer: CpuBuffer) {
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_sub(buffer.size_in_bytes(), Ordering::Relaxed);
    }
}

impl TransferOps for CpuBackend {
    fn copy_h2d<E: bytemuck::NoUninit>(&self, dst: &mut CpuBuffer, src: &[E]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(src);
        if bytes.len() > dst.size_in_bytes() {
            return Err(Error::InvalidShape(format!(
                "copy of {} bytes into a {} byte buffer",
                bytes.len(),
                dst.size_in_bytes()
            )));
        }
        dst.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        self.counters.h2d_copies.fetch_add(1, Ordering::Relaxed);
        self.counters
            .h2d_bytes
            .fetch_add(bytes.len(), Ordering::Relaxed);
        Ok(())
    }

    fn read_scalar_i32(&self, tensor: &CpuTensor) -> Result<i32> {
        tensor.expect_dtype(DType::I32)?;
        tensor
            .as_slice::<i32>()?
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidShape("empty scalar tensor".into()))
    }
}
