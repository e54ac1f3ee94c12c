//! The batched top-k sampling layer.
//!
//! One [`TopKSamplingLayer`] serves one generation loop:
//!
//! ```text
//! setup(batch_size, args)      once per generation step (may skip the step)
//!   └── execute(inputs, outputs)   once per pipeline iteration
//! ```
//!
//! `setup` resolves per-request parameters on the host and stages them on
//! the device; `execute` masks logits and launches the batched sampling
//! kernel against the iteration's slice of the batch. All mutable state is
//! owned by the layer instance; callers sequence calls on one thread.

mod base;
mod buffers;
mod execute;
mod setup;

pub use base::SamplingBase;
pub use buffers::{BufferViews, SamplingBuffers};
pub use execute::{names, DecodeStepContext, StepOutputs};

use std::marker::PhantomData;

use crate::backend::SamplingBackend;
use crate::config::SamplingConfig;
use crate::dtype::LogitDType;
use crate::host_buffer::HostBuffer;
use crate::sampling::ClampWarning;
use crate::Result;

/// Mutable per-instance state carried from `setup` to `execute`.
#[derive(Debug, Default)]
pub struct LayerState {
    /// Set when the whole step is deferred to the top-p strategy.
    pub skip_all: bool,
    /// Largest resolved `top_k` in the active batch.
    pub runtime_max_top_k: u32,
    /// Active batch size from the last non-skipped `setup`.
    pub batch_size: usize,
    pub h_top_k: HostBuffer<u32>,
    pub h_top_p: HostBuffer<f32>,
    pub h_skip_decode: HostBuffer<bool>,
    /// Clamp diagnostics from the last `setup`.
    pub warnings: Vec<ClampWarning>,
}

/// Top-k (with per-request top-p) sampling over a batch.
///
/// `T` is the logits element type, bound once at construction.
pub struct TopKSamplingLayer<T: LogitDType, B: SamplingBackend<T>> {
    backend: B,
    config: SamplingConfig,
    buffers: SamplingBuffers<T, B>,
    base: SamplingBase<B>,
    state: LayerState,
    staged_logits: Option<B::Tensor>,
    _dtype: PhantomData<T>,
}

impl<T: LogitDType, B: SamplingBackend<T>> TopKSamplingLayer<T, B> {
    /// Create a layer driving `backend`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(config: SamplingConfig, backend: B) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            dtype = %T::DTYPE,
            max_batch_size = config.max_batch_size,
            vocab_size = config.vocab_size,
            vocab_size_padded = config.vocab_size_padded,
            top_k_max = config.top_k_max,
            "create top-k sampling layer"
        );
        let base = SamplingBase::new(&config);
        Ok(Self {
            backend,
            config,
            buffers: SamplingBuffers::new(),
            base,
            state: LayerState::default(),
            staged_logits: None,
            _dtype: PhantomData,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn state(&self) -> &LayerState {
        &self.state
    }

    #[must_use]
    pub fn buffers(&self) -> &SamplingBuffers<T, B> {
        &self.buffers
    }

    #[must_use]
    pub fn base(&self) -> &SamplingBase<B> {
        &self.base
    }

    /// Whether the last `setup` deferred the whole step. When set, the
    /// caller must not call [`execute`](Self::execute) for this step.
    #[must_use]
    pub fn skip_all(&self) -> bool {
        self.state.skip_all
    }

    #[must_use]
    pub fn runtime_max_top_k(&self) -> u32 {
        self.state.runtime_max_top_k
    }

    /// Clamp diagnostics recorded by the last `setup`.
    #[must_use]
    pub fn warnings(&self) -> &[ClampWarning] {
        &self.state.warnings
    }

    /// Install logits produced by an alternate path; the next `execute`
    /// samples from them instead of `inputs["logits"]`.
    pub fn stage_logits(&mut self, logits: B::Tensor) {
        self.staged_logits = Some(logits);
    }

    /// Ensure device buffers fit `batch_size` requests with the given
    /// resolved `top_k` values.
    ///
    /// # Errors
    /// Propagates allocator failures.
    pub fn reserve(&mut self, batch_size: usize, top_k: &[u32]) -> Result<()> {
        self.buffers
            .reserve(&self.backend, batch_size, top_k, self.config.vocab_size_padded)
    }

    /// Free every device buffer the layer owns. Idempotent.
    pub fn release(&mut self) {
        self.buffers.release(&self.backend);
        self.base.free(&self.backend);
    }

    /// Release buffers and forget all per-step state.
    pub fn reset(&mut self) {
        self.release();
        self.state = LayerState::default();
        self.staged_logits = None;
    }
}

impl<T: LogitDType, B: SamplingBackend<T>> Drop for TopKSamplingLayer<T, B> {
    fn drop(&mut self) {
        self.release();
    }
}
