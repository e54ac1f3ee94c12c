//! Device scratch workspace and per-request parameter buffers.
//!
//! Buffers are reallocated to the exact requested size, never grown
//! geometrically. Each `reserve` therefore costs a device reallocation, so
//! callers only reserve when the batch size or the batch's largest `top_k`
//! actually changes (see [`SamplingBuffers::needs_reserve`]).

use std::marker::PhantomData;

use crate::backend::{AllocatorOps, DeviceBuffer, TopKSamplingOps};
use crate::dtype::LogitDType;
use crate::{Error, Result};

/// Mutable views of every buffer a sampling launch reads or writes.
pub struct BufferViews<'a, B: AllocatorOps> {
    pub workspace: &'a mut B::Buffer,
    pub top_k: &'a B::Buffer,
    pub top_p: &'a B::Buffer,
    pub skip_decode: &'a B::Buffer,
}

/// Owns the top-k workspace plus the `top_k`, `top_p` and skip-flag device
/// buffers, all sized for one batch.
pub struct SamplingBuffers<T, B: AllocatorOps> {
    workspace: Option<B::Buffer>,
    top_k: Option<B::Buffer>,
    top_p: Option<B::Buffer>,
    skip_decode: Option<B::Buffer>,
    workspace_size: usize,
    batch_size: usize,
    max_top_k: u32,
    allocated: bool,
    _dtype: PhantomData<T>,
}

impl<T, B: AllocatorOps> Default for SamplingBuffers<T, B> {
    fn default() -> Self {
        Self {
            workspace: None,
            top_k: None,
            top_p: None,
            skip_decode: None,
            workspace_size: 0,
            batch_size: 0,
            max_top_k: 0,
            allocated: false,
            _dtype: PhantomData,
        }
    }
}

impl<T: LogitDType, B: AllocatorOps + TopKSamplingOps<T>> SamplingBuffers<T, B> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether buffers must be (re)reserved before staging a batch of
    /// `batch_size` requests whose largest resolved `top_k` is `max_top_k`.
    #[must_use]
    pub fn needs_reserve(&self, batch_size: usize, max_top_k: u32) -> bool {
        !self.allocated || self.batch_size != batch_size || max_top_k.max(1) > self.max_top_k
    }

    /// Size every buffer for `batch_size` requests with the given `top_k`
    /// values.
    ///
    /// The workspace size comes from the kernel's sizing query for the
    /// batch's largest `k`. A largest `k` of 0 (or an empty slice) queries
    /// with 1: all-zero `k` still has to be sampled greedily when `top_p`
    /// is also zero.
    ///
    /// # Errors
    /// Propagates allocator failures unchanged. After a failure the buffers
    /// count as unallocated and [`needs_reserve`](Self::needs_reserve)
    /// reports `true` for every shape.
    pub fn reserve(
        &mut self,
        backend: &B,
        batch_size: usize,
        top_k: &[u32],
        vocab_size_padded: usize,
    ) -> Result<()> {
        let max_top_k = top_k.iter().copied().max().unwrap_or(1).max(1);
        let workspace_size = backend.top_k_workspace_size(max_top_k, batch_size, vocab_size_padded);
        tracing::debug!(batch_size, max_top_k, workspace_size, "reserve sampling buffers");

        // A failure below may leave some slots empty; the next setup must reserve again.
        self.workspace_size = 0;
        self.batch_size = 0;
        self.max_top_k = 0;
        self.allocated = false;

        self.workspace = Some(backend.realloc(self.workspace.take(), workspace_size)?);
        self.top_k = Some(backend.realloc(
            self.top_k.take(),
            batch_size * std::mem::size_of::<u32>(),
        )?);
        self.top_p = Some(backend.realloc(
            self.top_p.take(),
            batch_size * std::mem::size_of::<f32>(),
        )?);
        self.skip_decode = Some(backend.realloc(
            self.skip_decode.take(),
            batch_size * std::mem::size_of::<bool>(),
        )?);

        self.workspace_size = workspace_size;
        self.batch_size = batch_size;
        self.max_top_k = max_top_k;
        self.allocated = true;
        Ok(())
    }
}

impl<T, B: AllocatorOps> SamplingBuffers<T, B> {
    /// Free everything. Safe to call when nothing is allocated.
    pub fn release(&mut self, backend: &B) {
        if self.allocated {
            tracing::debug!(batch_size = self.batch_size, "release sampling buffers");
        }
        for buffer in [
            self.workspace.take(),
            self.top_k.take(),
            self.top_p.take(),
            self.skip_decode.take(),
        ]
        .into_iter()
        .flatten()
        {
            backend.free(buffer);
        }
        self.workspace_size = 0;
        self.batch_size = 0;
        self.max_top_k = 0;
        self.allocated = false;
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Batch size the buffers are currently sized for.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Largest `k` the workspace is currently sized for.
    #[must_use]
    pub fn max_top_k(&self) -> u32 {
        self.max_top_k
    }

    /// Workspace size in bytes as reported by the sizing query.
    #[must_use]
    pub fn workspace_size(&self) -> usize {
        self.workspace_size
    }

    /// The three per-request parameter buffers, for host staging.
    ///
    /// # Errors
    /// Returns an error if the buffers are not allocated.
    pub fn params_mut(&mut self) -> Result<(&mut B::Buffer, &mut B::Buffer, &mut B::Buffer)> {
        match (&mut self.top_k, &mut self.top_p, &mut self.skip_decode) {
            (Some(k), Some(p), Some(skip)) => Ok((k, p, skip)),
            _ => Err(not_allocated()),
        }
    }

    /// Views for one sampling launch.
    ///
    /// # Errors
    /// Returns an error if the buffers are not allocated.
    pub fn views(&mut self) -> Result<BufferViews<'_, B>> {
        match (
            &mut self.workspace,
            &self.top_k,
            &self.top_p,
            &self.skip_decode,
        ) {
            (Some(workspace), Some(top_k), Some(top_p), Some(skip_decode)) => {
                debug_assert!(workspace.size_in_bytes() >= self.workspace_size);
                Ok(BufferViews {
                    workspace,
                    top_k,
                    top_p,
                    skip_decode,
                })
            }
            _ => Err(not_allocated()),
        }
    }
}

fn not_allocated() -> Error {
    Error::Other("sampling buffers are not allocated; call setup first".into())
}
