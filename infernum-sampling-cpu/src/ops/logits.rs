//! LogitsOps implementation for CpuBackend.

use infernum_sampling::backend::{LogitsOps, PenaltyArgs};
use infernum_sampling::dtype::{DType, LogitDType};
use infernum_sampling::tensor::Tensor;
use infernum_sampling::{Error, Result};

use crate::tensor::CpuTensor;
use crate::CpuBackend;

/// `(rows, padded_vocab)` of a logits tensor, checking its dtype and that
/// `vocab_size` fits.
fn logits_dims<T: LogitDType>(logits: &CpuTensor, vocab_size: usize) -> Result<(usize, usize)> {
    logits.expect_dtype(T::DTYPE)?;
    let rows = logits.dim(0)?;
    let padded = logits.dim(1)?;
    if vocab_size > padded {
        return Err(Error::InvalidShape(format!(
            "vocab_size ({vocab_size}) exceeds padded row width ({padded})"
        )));
    }
    Ok((rows, padded))
}

/// Per-row end id: one shared id or one per row.
pub(crate) fn end_id_for(end_ids: &[i32], row: usize) -> Result<i32> {
    match end_ids {
        [id] => Ok(*id),
        ids => ids
            .get(row)
            .copied()
            .ok_or_else(|| Error::InvalidShape(format!("no end_id for request {row}"))),
    }
}

fn check_len(name: &str, len: usize, needed: usize) -> Result<()> {
    if len < needed {
        return Err(Error::InvalidShape(format!(
            "{name} has {len} elements, need {needed}"
        )));
    }
    Ok(())
}

impl<T: LogitDType> LogitsOps<T> for CpuBackend {
    fn add_end_mask(
        &self,
        logits: &mut CpuTensor,
        end_ids: &CpuTensor,
        finished: Option<&CpuTensor>,
        vocab_size: usize,
    ) -> Result<()> {
        let (rows, padded) = logits_dims::<T>(logits, vocab_size)?;
        end_ids.expect_dtype(DType::I32)?;
        let end_ids = end_ids.as_slice::<i32>()?;
        let finished = match finished {
            Some(f) => {
                let flags = f.as_slice::<u8>()?;
                check_len("finished", flags.len(), rows)?;
                Some(flags)
            }
            None => None,
        };

        let data = logits.as_slice_mut::<T>()?;
        for (r, row) in data.chunks_exact_mut(padded).enumerate() {
            row[vocab_size..].fill(T::lowest());
            if finished.is_some_and(|f| f[r] != 0) {
                let end_id = end_id_for(end_ids, r)?;
                for (id, v) in row[..vocab_size].iter_mut().enumerate() {
                    *v = if i32::try_from(id) == Ok(end_id) {
                        T::highest()
                    } else {
                        T::lowest()
                    };
                }
            }
        }
        Ok(())
    }

    fn softmax(&self, logits: &mut CpuTensor, vocab_size: usize) -> Result<()> {
        let (_, padded) = logits_dims::<T>(logits, vocab_size)?;
        let data = logits.as_slice_mut::<T>()?;
        for row in data.chunks_exact_mut(padded) {
            let (live, tail) = row.split_at_mut(vocab_size);
            let max = live
                .iter()
                .map(|v| v.to_f32())
                .fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = live.iter().map(|v| (v.to_f32() - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            for (v, e) in live.iter_mut().zip(&exps) {
                *v = T::from_f32(e / sum);
            }
            tail.fill(T::from_f32(0.0));
        }
        Ok(())
    }

    fn apply_penalties(&self, logits: &mut CpuTensor, args: PenaltyArgs<'_, Self>) -> Result<()> {
        let (rows, padded) = logits_dims::<T>(logits, args.vocab_size)?;
        let temperatures = args.temperatures.as_slice::<f32>()?;
        let penalties = args.repetition_penalties.as_slice::<f32>()?;
        check_len("temperatures", temperatures.len(), args.param_offset + rows)?;
        check_len("repetition_penalties", penalties.len(), args.param_offset + rows)?;

        args.output_ids.expect_dtype(DType::I32)?;
        let history = args.output_ids.as_slice::<i32>()?;
        let width = args.output_ids.dim(1)?;
        check_len("output_ids", history.len(), args.step * width)?;
        if rows > 0 {
            check_len("output_ids row", width, args.id_offset + rows)?;
        }

        let data = logits.as_slice_mut::<T>()?;
        for (r, row) in data.chunks_exact_mut(padded).enumerate() {
            let live = &mut row[..args.vocab_size];

            let penalty = penalties[args.param_offset + r];
            #[allow(clippy::float_cmp)]
            if penalty != 1.0 {
                let mut seen: Vec<usize> = (0..args.step)
                    .filter_map(|t| usize::try_from(history[t * width + args.id_offset + r]).ok())
                    .filter(|&id| id < live.len())
                    .collect();
                seen.sort_unstable();
                seen.dedup();
                for id in seen {
                    let v = live[id].to_f32();
                    let penalized = if v > 0.0 { v / penalty } else { v * penalty };
                    live[id] = T::from_f32(penalized);
                }
            }

            let temperature = temperatures[args.param_offset + r];
            #[allow(clippy::float_cmp)]
            if temperature != 1.0 {
                for v in live.iter_mut() {
                    *v = T::from_f32(v.to_f32() / temperature);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use infernum_sampling::backend::{AllocatorOps, TransferOps};

    fn mask(
        logits: &mut CpuTensor,
        end_ids: &CpuTensor,
        finished: Option<&CpuTensor>,
        vocab: usize,
    ) {
        <CpuBackend as LogitsOps<f32>>::add_end_mask(&CpuBackend::new(), logits, end_ids, finished, vocab)
            .unwrap();
    }

    #[test]
    fn test_mask_padding_only() {
        let mut logits = CpuTensor::from_slice(&[1, 4], &[1.0f32, 2.0, 3.0, 4.0]);
        mask(&mut logits, &CpuTensor::scalar_i32(0), None, 3);
        assert_eq!(logits.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0, f32::MIN]);
    }

    #[test]
    fn test_mask_finished_forces_end_id() {
        let mut logits = CpuTensor::from_slice(&[2, 3], &[1.0f32, 2.0, 3.0, 1.0, 2.0, 3.0]);
        let finished = CpuTensor::from_bools(&[2], &[false, true]);
        let end_ids = CpuTensor::from_slice(&[2], &[0i32, 1]);
        mask(&mut logits, &end_ids, Some(&finished), 3);
        assert_eq!(
            logits.as_slice::<f32>().unwrap(),
            &[1.0, 2.0, 3.0, f32::MIN, f32::MAX, f32::MIN]
        );
    }

    #[test]
    fn test_softmax_zeroes_padding() {
        let backend = CpuBackend::new();
        let mut logits = CpuTensor::from_slice(&[1, 3], &[0.0f32, 0.0, 99.0]);
        LogitsOps::<f32>::softmax(&backend, &mut logits, 2).unwrap();
        assert_eq!(logits.as_slice::<f32>().unwrap(), &[0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_softmax_bf16() {
        let backend = CpuBackend::new();
        let mut logits = CpuTensor::from_f32_as::<half::bf16>(&[1, 2], &[1.0, 1.0]);
        LogitsOps::<half::bf16>::softmax(&backend, &mut logits, 2).unwrap();
        assert_eq!(logits.to_f32_vec().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_penalties() {
        let backend = CpuBackend::new();
        let mut temperatures = backend.realloc(None, 8).unwrap();
        let mut penalties = backend.realloc(None, 8).unwrap();
        backend.copy_h2d(&mut temperatures, &[1.0f32, 2.0]).unwrap();
        backend.copy_h2d(&mut penalties, &[1.0f32, 2.0]).unwrap();

        // Two steps of history for a batch of 2; request 1 generated 0 then 0.
        let output_ids = CpuTensor::from_slice(&[3, 2], &[2i32, 0, 2, 0, 0, 0]);
        let mut logits = CpuTensor::from_slice(&[1, 3], &[4.0f32, -4.0, 1.0]);
        LogitsOps::<f32>::apply_penalties(
            &backend,
            &mut logits,
            PenaltyArgs {
                temperatures: &temperatures,
                repetition_penalties: &penalties,
                param_offset: 1,
                output_ids: &output_ids,
                step: 2,
                id_offset: 1,
                vocab_size: 3,
            },
        )
        .unwrap();
        // id 0 penalised once (4 / 2), then everything halved by temperature.
        assert_eq!(logits.as_slice::<f32>().unwrap(), &[1.0, -2.0, 0.5]);
    }
}
