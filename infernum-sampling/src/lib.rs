//! Infernum sampling: batched top-k sampling for autoregressive decoding.
//!
//! This crate provides the hardware-agnostic half of the sampling layer:
//! per-request parameter resolution, buffer lifecycle, batch setup and the
//! decode-step orchestration. Device work is expressed through the op traits
//! in [`backend`]; backend crates (e.g. `infernum-sampling-cpu`) implement
//! them.

#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
pub mod backend;
pub mod config;
pub mod dtype;
pub mod error;
pub mod host_buffer;
pub mod layer;
pub mod runtime_args;
pub mod sampling;
pub mod tensor;
pub mod tensor_map;

pub use backend::{
    AllocatorOps, Backend, DeviceBuffer, LogitsOps, PenaltyArgs, RandomStateOps, SamplingBackend,
    TopKSampleArgs, TopKSamplingOps, TransferOps,
};
pub use config::{SamplingConfig, TOP_K_MAX};
pub use dtype::{DType, LogitDType, TensorDType};
pub use error::{Error, Result};
pub use host_buffer::HostBuffer;
pub use layer::{
    names, BufferViews, DecodeStepContext, LayerState, SamplingBase, SamplingBuffers,
    StepOutputs, TopKSamplingLayer,
};
pub use runtime_args::{ArgSource, RuntimeArgs};
pub use sampling::{ClampWarning, ResolvedRequest, ResolvedSamplingParams};
pub use tensor::Tensor;
pub use tensor_map::TensorMap;
