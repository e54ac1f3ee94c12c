//! Backend trait and op trait definitions for hardware-agnostic sampling.
//!
//! The sampling layer is generic over `B: SamplingBackend<T>` and expresses
//! every device interaction through the op traits below. Each backend (CPU,
//! CUDA, ...) implements them with its own tensor and buffer types.
//!
//! # Design notes
//!
//! - **One backend value per layer.** The backend value is the device handle
//!   plus its single in-order execution stream. Every op is enqueued on that
//!   stream in call order, so consecutive decode steps need no explicit
//!   synchronisation. [`Backend::sync_check`] is an error checkpoint, not a
//!   pacing barrier.
//! - **Buffers are untyped.** Device buffers are byte regions reallocated
//!   to an exact size. Typed views are the backend's concern.
//! - **Offsets, not views.** Per-iteration addressing is passed as element
//!   offsets next to the buffer or tensor they apply to.

use crate::dtype::LogitDType;
use crate::tensor::Tensor;
use crate::Result;

// ---- Core backend trait ----

/// A device byte buffer.
pub trait DeviceBuffer {
    /// Allocated size in bytes.
    fn size_in_bytes(&self) -> usize;
}

/// A compute backend (CPU, CUDA, ...).
pub trait Backend: Sized + 'static {
    /// The tensor type for this backend.
    type Tensor: Tensor;

    /// Untyped device allocation.
    type Buffer: DeviceBuffer;

    /// Error checkpoint after an enqueue.
    ///
    /// # Errors
    /// Returns `Error::Device` if previously enqueued work failed.
    fn sync_check(&self) -> Result<()>;
}

// ---- Op traits ----

/// Device memory allocation.
pub trait AllocatorOps: Backend {
    /// Reallocate `buffer` to exactly `bytes` bytes. Contents are not
    /// preserved. Passing `None` allocates fresh memory.
    ///
    /// # Errors
    /// Returns `Error::Alloc` if the device cannot satisfy the request.
    fn realloc(&self, buffer: Option<Self::Buffer>, bytes: usize) -> Result<Self::Buffer>;

    /// Return `buffer` to the device.
    fn free(&self, buffer: Self::Buffer);
}

/// Host/device transfers and host-resident scalar reads.
pub trait TransferOps: Backend {
    /// Enqueue a copy of `src` into the start of `dst`.
    ///
    /// # Errors
    /// Returns an error if `src` does not fit in `dst`.
    fn copy_h2d<E: bytemuck::NoUninit>(&self, dst: &mut Self::Buffer, src: &[E]) -> Result<()>;

    /// Read a host-resident `i32` scalar tensor (`step`, `ite`).
    ///
    /// # Errors
    /// Returns an error if the tensor is empty or not `i32`.
    fn read_scalar_i32(&self, tensor: &Self::Tensor) -> Result<i32>;
}

/// Per-request temperature and repetition penalty application.
pub struct PenaltyArgs<'a, B: Backend> {
    /// Per-request temperatures (`f32`).
    pub temperatures: &'a B::Buffer,
    /// Per-request repetition penalties (`f32`).
    pub repetition_penalties: &'a B::Buffer,
    /// Element offset into both parameter buffers.
    pub param_offset: usize,
    /// Previously generated ids, `[max_seq_len, batch_size]` (`i32`).
    pub output_ids: &'a B::Tensor,
    /// Number of leading `output_ids` rows that hold history.
    pub step: usize,
    /// Column of `output_ids` that maps to local request 0.
    pub id_offset: usize,
    /// Number of real vocabulary entries per logits row.
    pub vocab_size: usize,
}

/// Logits post-processing primitives.
pub trait LogitsOps<T: LogitDType>: Backend {
    /// Mask the padded tail of each row, and for every request whose
    /// `finished` flag is set force its end id to be selected.
    ///
    /// `end_ids` holds one id, or one per local request.
    ///
    /// # Errors
    /// Returns an error on shape or dtype mismatch.
    fn add_end_mask(
        &self,
        logits: &mut Self::Tensor,
        end_ids: &Self::Tensor,
        finished: Option<&Self::Tensor>,
        vocab_size: usize,
    ) -> Result<()>;

    /// Replace each row's first `vocab_size` logits with probabilities; the
    /// padded tail becomes zero.
    ///
    /// # Errors
    /// Returns an error on shape or dtype mismatch.
    fn softmax(&self, logits: &mut Self::Tensor, vocab_size: usize) -> Result<()>;

    /// Apply repetition penalty, then temperature, in place.
    ///
    /// # Errors
    /// Returns an error on shape or dtype mismatch.
    fn apply_penalties(&self, logits: &mut Self::Tensor, args: PenaltyArgs<'_, Self>) -> Result<()>;
}

/// Per-request random generator state.
pub trait RandomStateOps: Backend {
    /// Initialise `states[offset..offset + seeds.len()]` from `seeds`. The
    /// request's global index is mixed in so equal seeds give independent
    /// streams.
    ///
    /// # Errors
    /// Returns an error if the range is out of bounds.
    fn init_rand_states(&self, states: &mut Self::Tensor, offset: usize, seeds: &[u64])
        -> Result<()>;
}

/// Arguments of one batched top-k sampling launch.
///
/// `logits`, `finished`, `sequence_length`, the log-prob targets and the
/// introspection outputs are indexed by local request. `output_ids` is
/// written at `output_offset + j`. Per-request parameters and random states
/// are read at `param_offset + j`.
pub struct TopKSampleArgs<'a, B: Backend> {
    pub workspace: &'a mut B::Buffer,
    /// `[local_batch_size, vocab_size_padded]`.
    pub logits: &'a B::Tensor,
    /// Rows already hold normalised probabilities.
    pub logits_are_probs: bool,
    pub output_ids: &'a mut B::Tensor,
    pub output_offset: usize,
    pub sequence_length: Option<&'a mut B::Tensor>,
    pub finished: Option<&'a mut B::Tensor>,
    pub cum_log_probs: Option<&'a mut B::Tensor>,
    pub output_log_probs: Option<&'a mut B::Tensor>,
    /// `[local_batch_size, n]`: probabilities of the top candidates.
    pub sampled_logprobs: Option<&'a mut B::Tensor>,
    /// `[local_batch_size, n]`: ids of the top candidates.
    pub sampled_indexes: Option<&'a mut B::Tensor>,
    /// `[local_batch_size]`: number of candidates written per request.
    pub sampled_nums: Option<&'a mut B::Tensor>,
    pub rand_states: &'a mut B::Tensor,
    /// Kept for kernels that size their launch from a batch-wide bound.
    /// The per-request `top_ks` buffer is authoritative.
    pub max_top_k: u32,
    pub top_ks: &'a B::Buffer,
    pub top_ps: &'a B::Buffer,
    pub skip_decode: &'a B::Buffer,
    pub param_offset: usize,
    pub vocab_size: usize,
    pub end_ids: &'a B::Tensor,
    pub local_batch_size: usize,
}

/// The batched top-k (with per-request top-p) sampling primitive.
pub trait TopKSamplingOps<T: LogitDType>: Backend {
    /// Scratch bytes needed to sample `batch_size` requests with per-request
    /// `k <= max_top_k`. Pure in its inputs.
    fn top_k_workspace_size(
        &self,
        max_top_k: u32,
        batch_size: usize,
        vocab_size_padded: usize,
    ) -> usize;

    /// Sample one token per local request. Requests whose skip flag is set
    /// are left untouched, including their random state.
    ///
    /// # Errors
    /// Returns `WorkspaceTooSmall` if `workspace` is smaller than required,
    /// or a shape/dtype error for malformed arguments.
    fn batch_top_k_sample(&self, args: TopKSampleArgs<'_, Self>) -> Result<()>;
}

/// Everything the top-k sampling layer needs from a backend.
pub trait SamplingBackend<T: LogitDType>:
    AllocatorOps + TransferOps + LogitsOps<T> + RandomStateOps + TopKSamplingOps<T>
{
}

impl<T, B> SamplingBackend<T> for B
where
    T: LogitDType,
    B: AllocatorOps + TransferOps + LogitsOps<T> + RandomStateOps + TopKSamplingOps<T>,
{
}
