//! TopKSamplingOps implementation for CpuBackend.
//!
//! Per request, the kernel keeps the `k` best candidates in the workspace
//! (ids then values, `stride` slots per request), weights them, and draws
//! from the first `top_p` fraction of their total mass.

use std::sync::atomic::Ordering;

use infernum_sampling::backend::{DeviceBuffer, TopKSampleArgs, TopKSamplingOps};
use infernum_sampling::dtype::{DType, LogitDType};
use infernum_sampling::tensor::Tensor;
use infernum_sampling::{Error, Result};

use super::logits::end_id_for;
use super::random::draw_uniform;
use crate::tensor::CpuTensor;
use crate::CpuBackend;

/// Bytes of workspace per candidate slot: one `u32` id and one `f32` value.
const SLOT_BYTES: usize = 8;

/// Insert `(id, value)` into the descending candidate list of length
/// `*len` and capacity `ids.len()`.
fn push_candidate(ids: &mut [u32], vals: &mut [f32], len: &mut usize, id: u32, value: f32) {
    let cap = ids.len();
    if *len == cap && !(value > vals[cap - 1]) {
        return;
    }
    let mut pos = (*len).min(cap - 1);
    while pos > 0 && value > vals[pos - 1] {
        ids[pos] = ids[pos - 1];
        vals[pos] = vals[pos - 1];
        pos -= 1;
    }
    ids[pos] = id;
    vals[pos] = value;
    *len = (*len + 1).min(cap);
}

fn slice_range<'a, E>(name: &str, data: &'a [E], start: usize, len: usize) -> Result<&'a [E]> {
    data.get(start..start + len).ok_or_else(|| {
        Error::InvalidShape(format!(
            "{name}: [{start}, {}) out of range for {} elements",
            start + len,
            data.len()
        ))
    })
}

fn optional_mut<'a, E: infernum_sampling::TensorDType>(
    name: &str,
    tensor: Option<&'a mut CpuTensor>,
    min_len: usize,
) -> Result<Option<&'a mut [E]>> {
    match tensor {
        Some(t) => {
            let data = t.as_slice_mut::<E>()?;
            if data.len() < min_len {
                return Err(Error::InvalidShape(format!(
                    "{name} has {} elements, need {min_len}",
                    data.len()
                )));
            }
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

impl<T: LogitDType> TopKSamplingOps<T> for CpuBackend {
    fn top_k_workspace_size(
        &self,
        max_top_k: u32,
        batch_size: usize,
        _vocab_size_padded: usize,
    ) -> usize {
        batch_size * max_top_k as usize * SLOT_BYTES
    }

    #[allow(
        clippy::too_many_lines,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::float_cmp
    )]
    fn batch_top_k_sample(&self, args: TopKSampleArgs<'_, Self>) -> Result<()> {
        self.counters.launches.fetch_add(1, Ordering::Relaxed);
        let local = args.local_batch_size;
        let vocab_size = args.vocab_size;

        args.logits.expect_dtype(T::DTYPE)?;
        let padded = args.logits.dim(1)?;
        if args.logits.dim(0)? < local || vocab_size > padded || vocab_size == 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![local, vocab_size],
                got: args.logits.shape().to_vec(),
            });
        }
        let logits = args.logits.as_slice::<T>()?;

        let top_ks = slice_range("top_ks", args.top_ks.as_slice::<u32>()?, args.param_offset, local)?;
        let top_ps = slice_range("top_ps", args.top_ps.as_slice::<f32>()?, args.param_offset, local)?;
        let skip = slice_range(
            "skip_decode",
            args.skip_decode.as_slice::<u8>()?,
            args.param_offset,
            local,
        )?;

        let stride = top_ks.iter().copied().max().unwrap_or(1).max(1) as usize;
        let required = local * stride * SLOT_BYTES;
        if args.workspace.size_in_bytes() < required {
            return Err(Error::WorkspaceTooSmall {
                required,
                got: args.workspace.size_in_bytes(),
            });
        }
        let scratch = &mut args.workspace.as_slice_mut::<u32>()?[..2 * local * stride];
        let (ws_ids, ws_vals) = scratch.split_at_mut(local * stride);
        let ws_vals: &mut [f32] = bytemuck::cast_slice_mut(ws_vals);

        args.end_ids.expect_dtype(DType::I32)?;
        let end_ids = args.end_ids.as_slice::<i32>()?;
        args.output_ids.expect_dtype(DType::I32)?;
        let output_ids = args.output_ids.as_slice_mut::<i32>()?;
        if args.output_offset + local > output_ids.len() {
            return Err(Error::InvalidShape(format!(
                "output_ids: offset {} + {local} exceeds {} elements",
                args.output_offset,
                output_ids.len()
            )));
        }
        args.rand_states.expect_dtype(DType::U64)?;
        let states = args.rand_states.as_slice_mut::<u64>()?;
        if args.param_offset + local > states.len() {
            return Err(Error::InvalidShape(format!(
                "random states: {} requests, need {}",
                states.len(),
                args.param_offset + local
            )));
        }

        let mut sequence_length = optional_mut::<i32>("sequence_length", args.sequence_length, local)?;
        let mut finished = optional_mut::<u8>("finished", args.finished, local)?;
        let mut cum_log_probs = optional_mut::<f32>("cum_log_probs", args.cum_log_probs, local)?;
        let mut output_log_probs =
            optional_mut::<f32>("output_log_probs", args.output_log_probs, local)?;
        let mut sampled_nums = optional_mut::<u32>("sampled_nums", args.sampled_nums, local)?;
        let sampled_width = match (&args.sampled_indexes, &args.sampled_logprobs) {
            (Some(indexes), Some(logprobs)) => {
                let width = indexes.dim(1)?;
                if logprobs.dim(1)? != width {
                    return Err(Error::ShapeMismatch {
                        expected: vec![local, width],
                        got: logprobs.shape().to_vec(),
                    });
                }
                width
            }
            (Some(t), None) | (None, Some(t)) => t.dim(1)?,
            (None, None) => 0,
        };
        let mut sampled_indexes =
            optional_mut::<u32>("sampled_indexes", args.sampled_indexes, local * sampled_width)?;
        let mut sampled_logprobs =
            optional_mut::<f32>("sampled_logprobs", args.sampled_logprobs, local * sampled_width)?;

        for r in 0..local {
            if skip[r] != 0 {
                continue;
            }
            let g = args.param_offset + r;
            let end_id = end_id_for(end_ids, r)?;

            if finished.as_ref().is_some_and(|f| f[r] != 0) {
                output_ids[args.output_offset + r] = end_id;
                if let Some(nums) = sampled_nums.as_mut() {
                    nums[r] = 0;
                }
                continue;
            }

            let k = (top_ks[r] as usize).clamp(1, vocab_size);
            let ids = &mut ws_ids[r * stride..r * stride + k];
            let vals = &mut ws_vals[r * stride..r * stride + k];
            let row = &logits[r * padded..r * padded + vocab_size];
            let mut count = 0;
            for (id, v) in row.iter().enumerate() {
                push_candidate(ids, vals, &mut count, id as u32, v.to_f32());
            }

            // Candidate weights: probabilities as given, or exp relative to the best logit.
            let best = vals[0];
            let weights: Vec<f32> = vals[..count]
                .iter()
                .map(|&v| if args.logits_are_probs { v } else { (v - best).exp() })
                .collect();
            let total: f32 = weights.iter().sum();
            if !total.is_finite() || total <= 0.0 {
                self.record_fault(format!("request {g}: candidate mass {total} is not positive"));
            }

            let u = draw_uniform(&mut states[g]) * top_ps[r] * total;
            let mut chosen = count - 1;
            let mut cumulative = 0.0f32;
            for (i, w) in weights.iter().enumerate() {
                cumulative += w;
                if u < cumulative || (u == 0.0 && i == 0) {
                    chosen = i;
                    break;
                }
            }

            let token = ids[chosen] as i32;
            output_ids[args.output_offset + r] = token;

            let log_prob = if args.logits_are_probs {
                weights[chosen].ln()
            } else {
                (weights[chosen] / total).ln()
            };
            if let Some(cum) = cum_log_probs.as_mut() {
                cum[r] += log_prob;
            }
            if let Some(out) = output_log_probs.as_mut() {
                out[r] = log_prob;
            }
            if let Some(lengths) = sequence_length.as_mut() {
                lengths[r] += 1;
            }
            if let Some(flags) = finished.as_mut() {
                flags[r] = u8::from(token == end_id);
            }

            let n = count.min(sampled_width);
            if let Some(out) = sampled_indexes.as_mut() {
                out[r * sampled_width..r * sampled_width + n].copy_from_slice(&ids[..n]);
            }
            if let Some(out) = sampled_logprobs.as_mut() {
                for (dst, w) in out[r * sampled_width..r * sampled_width + n]
                    .iter_mut()
                    .zip(&weights)
                {
                    *dst = w / total;
                }
            }
            if let Some(nums) = sampled_nums.as_mut() {
                nums[r] = n as u32;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_push_candidate_keeps_best_descending() {
        let mut ids = [0u32; 3];
        let mut vals = [0.0f32; 3];
        let mut len = 0;
        for (id, v) in [1.0f32, 5.0, 3.0, 4.0, 0.5, 5.0].iter().enumerate() {
            push_candidate(&mut ids, &mut vals, &mut len, id as u32, *v);
        }
        assert_eq!(len, 3);
        assert_eq!(ids, [1, 5, 3]);
        assert_eq!(vals, [5.0, 5.0, 4.0]);
    }

    #[test]
    fn test_push_candidate_single_slot() {
        let mut ids = [0u32; 1];
        let mut vals = [0.0f32; 1];
        let mut len = 0;
        for (id, v) in [2.0f32, 1.0, 7.0, 7.0].iter().enumerate() {
            push_candidate(&mut ids, &mut vals, &mut len, id as u32, *v);
        }
        assert_eq!(ids, [2]);
    }

    #[test]
    fn test_workspace_size_scales_with_k_and_batch() {
        let backend = CpuBackend::new();
        let small = TopKSamplingOps::<f32>::top_k_workspace_size(&backend, 1, 4, 32_000);
        let large = TopKSamplingOps::<f32>::top_k_workspace_size(&backend, 50, 4, 32_000);
        assert_eq!(small, 32);
        assert_eq!(large, 50 * small);
    }
}
