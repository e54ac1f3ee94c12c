//! Shared helpers for CPU sampling-layer integration tests.
//!
//! Builds layers over a small padded vocabulary and the input/output maps
//! a decode step consumes.
#![allow(dead_code)]

use infernum_sampling::dtype::{DType, LogitDType};
use infernum_sampling::{names, SamplingConfig, TensorMap, TopKSamplingLayer};
use infernum_sampling_cpu::{CpuBackend, CpuTensor};

/// Real vocabulary entries per row.
pub const VOCAB: usize = 8;
/// Row stride; the last two columns are padding.
pub const PADDED: usize = 10;

pub fn config(max_batch_size: usize) -> SamplingConfig {
    SamplingConfig::default()
        .with_vocab(VOCAB, PADDED)
        .with_max_batch_size(max_batch_size)
}

pub fn layer(backend: &CpuBackend, max_batch_size: usize) -> TopKSamplingLayer<f32, CpuBackend> {
    layer_as::<f32>(backend, max_batch_size)
}

pub fn layer_as<T: LogitDType>(
    backend: &CpuBackend,
    max_batch_size: usize,
) -> TopKSamplingLayer<T, CpuBackend> {
    TopKSamplingLayer::new(config(max_batch_size), backend.clone()).expect("valid config")
}

/// Logits tensor `[rows.len(), PADDED]`; each row holds `VOCAB` values and
/// the padding is filled with a large value the mask must hide.
pub fn logits_as<T: LogitDType>(rows: &[[f32; VOCAB]]) -> CpuTensor {
    let mut data = Vec::with_capacity(rows.len() * PADDED);
    for row in rows {
        data.extend_from_slice(row);
        data.extend_from_slice(&[100.0; PADDED - VOCAB]);
    }
    CpuTensor::from_f32_as::<T>(&[rows.len(), PADDED], &data)
}

pub fn logits(rows: &[[f32; VOCAB]]) -> CpuTensor {
    logits_as::<f32>(rows)
}

/// A row whose single largest entry is `id`.
pub fn peaked(id: usize) -> [f32; VOCAB] {
    let mut row = [0.0; VOCAB];
    row[id] = 5.0;
    row
}

pub fn inputs(logits: CpuTensor, step: i32, ite: i32, end_id: i32) -> TensorMap<CpuTensor> {
    TensorMap::new()
        .with(names::LOGITS, logits)
        .with(names::STEP, CpuTensor::scalar_i32(step))
        .with(names::ITE, CpuTensor::scalar_i32(ite))
        .with(names::END_ID, CpuTensor::scalar_i32(end_id))
}

/// `output_ids` `[max_seq_len, batch_size]` filled with -1, plus random
/// states for the batch.
pub fn outputs(max_seq_len: usize, batch_size: usize) -> TensorMap<CpuTensor> {
    TensorMap::new()
        .with(
            names::OUTPUT_IDS,
            CpuTensor::from_slice(
                &[max_seq_len, batch_size],
                &vec![-1i32; max_seq_len * batch_size],
            ),
        )
        .with(
            names::RANDOM_STATE,
            CpuTensor::zeros(&[batch_size], DType::U64),
        )
}

pub fn output_ids(outputs: &TensorMap<CpuTensor>) -> Vec<i32> {
    outputs
        .require(names::OUTPUT_IDS)
        .and_then(|t| t.to_vec::<i32>())
        .expect("output_ids")
}
