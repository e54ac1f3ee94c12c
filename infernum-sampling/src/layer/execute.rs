//! Per-iteration decode step: mask, optionally normalise, sample.

use crate::backend::{SamplingBackend, TopKSampleArgs};
use crate::dtype::LogitDType;
use crate::tensor::Tensor;
use crate::tensor_map::TensorMap;
use crate::{Error, Result};

use super::TopKSamplingLayer;

/// Tensor names read from the `inputs` and `outputs` maps.
pub mod names {
    // ---- Inputs ----
    pub const LOGITS: &str = "logits";
    pub const STEP: &str = "step";
    pub const ITE: &str = "ite";
    pub const END_ID: &str = "end_id";

    // ---- Outputs ----
    pub const OUTPUT_IDS: &str = "output_ids";
    pub const RANDOM_STATE: &str = "random_state";
    pub const SEQUENCE_LENGTH: &str = "sequence_length";
    pub const FINISHED: &str = "finished";
    pub const CUM_LOG_PROBS: &str = "cum_log_probs";
    pub const OUTPUT_LOG_PROBS: &str = "output_log_probs";
    pub const SAMPLED_LOGPROBS: &str = "sampled_logprobs";
    pub const SAMPLED_INDEXES: &str = "sampled_indexes";
    pub const SAMPLED_NUMS: &str = "sampled_nums";

    pub const REQUIRED_INPUTS: [&str; 4] = [LOGITS, STEP, ITE, END_ID];
    pub const REQUIRED_OUTPUTS: [&str; 2] = [OUTPUT_IDS, RANDOM_STATE];
}

use names::*;

/// Addressing for one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStepContext {
    /// Current generation step (row of `output_ids`).
    pub step: usize,
    /// Pipeline iteration; selects a slice of the batch.
    pub ite: usize,
    /// Requests handled by this iteration.
    pub local_batch_size: usize,
    /// Full batch width of `output_ids`.
    pub batch_size: usize,
}

impl DecodeStepContext {
    /// Offset into per-request parameter buffers and random states.
    #[must_use]
    pub fn param_offset(&self) -> usize {
        self.ite * self.local_batch_size
    }

    /// Element offset of this iteration's first token in `output_ids`.
    #[must_use]
    pub fn output_offset(&self) -> usize {
        self.step * self.batch_size + self.ite * self.local_batch_size
    }
}

/// Output tensors moved out of the caller's map for the duration of a
/// sampling launch.
pub struct StepOutputs<X> {
    pub output_ids: X,
    pub random_state: X,
    pub sequence_length: Option<X>,
    pub finished: Option<X>,
    pub cum_log_probs: Option<X>,
    pub output_log_probs: Option<X>,
    pub sampled_logprobs: Option<X>,
    pub sampled_indexes: Option<X>,
    pub sampled_nums: Option<X>,
}

impl<X> StepOutputs<X> {
    /// Move the sampling outputs out of `outputs`.
    ///
    /// # Errors
    /// Returns `MissingTensor` if a required output is absent; `outputs` is
    /// left unchanged in that case.
    pub fn take_from(outputs: &mut TensorMap<X>) -> Result<Self> {
        for name in REQUIRED_OUTPUTS {
            outputs.require(name)?;
        }
        Ok(Self {
            output_ids: outputs.take_required(OUTPUT_IDS)?,
            random_state: outputs.take_required(RANDOM_STATE)?,
            sequence_length: outputs.take(SEQUENCE_LENGTH),
            finished: outputs.take(FINISHED),
            cum_log_probs: outputs.take(CUM_LOG_PROBS),
            output_log_probs: outputs.take(OUTPUT_LOG_PROBS),
            sampled_logprobs: outputs.take(SAMPLED_LOGPROBS),
            sampled_indexes: outputs.take(SAMPLED_INDEXES),
            sampled_nums: outputs.take(SAMPLED_NUMS),
        })
    }

    /// Put every tensor back under its original name.
    pub fn restore(self, outputs: &mut TensorMap<X>) {
        outputs.insert(OUTPUT_IDS, self.output_ids);
        outputs.insert(RANDOM_STATE, self.random_state);
        let optional = [
            (SEQUENCE_LENGTH, self.sequence_length),
            (FINISHED, self.finished),
            (CUM_LOG_PROBS, self.cum_log_probs),
            (OUTPUT_LOG_PROBS, self.output_log_probs),
            (SAMPLED_LOGPROBS, self.sampled_logprobs),
            (SAMPLED_INDEXES, self.sampled_indexes),
            (SAMPLED_NUMS, self.sampled_nums),
        ];
        for (name, tensor) in optional {
            if let Some(tensor) = tensor {
                outputs.insert(name, tensor);
            }
        }
    }

    /// Whether the caller asked for any log-probability output.
    #[must_use]
    pub fn wants_log_probs(&self) -> bool {
        self.cum_log_probs.is_some() || self.output_log_probs.is_some()
    }
}

impl<T: LogitDType, B: SamplingBackend<T>> TopKSamplingLayer<T, B> {
    /// Sample one token for each request of pipeline iteration `ite`.
    ///
    /// Writes `output_ids[step * batch_size + ite * local_batch_size + j]`
    /// for every non-skipped local request `j`, where `batch_size` is
    /// `output_ids.shape[1]` and `local_batch_size` is `logits.shape[0]`.
    /// Logits are masked in place. Logits staged with
    /// [`stage_logits`](Self::stage_logits) are consumed instead of
    /// `inputs["logits"]`.
    ///
    /// Must not be called for a step where [`skip_all`](Self::skip_all) is
    /// set.
    ///
    /// # Errors
    /// Returns `MissingTensor` for an absent required tensor, a shape error
    /// if the iteration does not fit the batch prepared by `setup`, or
    /// propagates backend failures.
    pub fn execute(
        &mut self,
        inputs: &mut TensorMap<B::Tensor>,
        outputs: &mut TensorMap<B::Tensor>,
    ) -> Result<()> {
        let ctx = self.step_context(inputs, outputs)?;
        self.run_step(ctx, inputs, outputs)
    }

    /// Full per-step entry point: seed random states and apply repetition
    /// penalty and temperature, then [`execute`](Self::execute). A step
    /// deferred by `setup` is a no-op.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub fn forward(
        &mut self,
        inputs: &mut TensorMap<B::Tensor>,
        outputs: &mut TensorMap<B::Tensor>,
    ) -> Result<()> {
        if self.state.skip_all {
            tracing::debug!("step deferred to top-p, nothing to sample");
            return Ok(());
        }
        let ctx = self.step_context(inputs, outputs)?;

        let mut random_state = outputs.take_required(RANDOM_STATE)?;
        let applied = {
            let logits = match self.staged_logits.as_mut() {
                Some(staged) => Ok(staged),
                None => inputs
                    .get_mut(LOGITS)
                    .ok_or_else(|| Error::MissingTensor(LOGITS.into())),
            };
            logits.and_then(|logits| {
                self.base.apply::<T>(
                    &self.backend,
                    logits,
                    &mut random_state,
                    outputs.require(OUTPUT_IDS)?,
                    ctx.step,
                    ctx.param_offset(),
                    ctx.local_batch_size,
                    self.config.vocab_size,
                )
            })
        };
        outputs.insert(RANDOM_STATE, random_state);
        applied?;

        self.run_step(ctx, inputs, outputs)
    }

    /// Validate the maps and derive the iteration's addressing.
    fn step_context(
        &self,
        inputs: &TensorMap<B::Tensor>,
        outputs: &TensorMap<B::Tensor>,
    ) -> Result<DecodeStepContext> {
        for name in REQUIRED_INPUTS {
            inputs.require(name)?;
        }
        for name in REQUIRED_OUTPUTS {
            outputs.require(name)?;
        }

        let step = self.read_index(inputs.require(STEP)?, STEP)?;
        let ite = self.read_index(inputs.require(ITE)?, ITE)?;
        let output_ids = outputs.require(OUTPUT_IDS)?;
        let logits = inputs.require(LOGITS)?;
        let ctx = DecodeStepContext {
            step,
            ite,
            local_batch_size: logits.dim(0)?,
            batch_size: output_ids.dim(1)?,
        };

        if let Some(staged) = &self.staged_logits {
            if staged.shape() != logits.shape() {
                return Err(Error::ShapeMismatch {
                    expected: logits.shape().to_vec(),
                    got: staged.shape().to_vec(),
                });
            }
        }
        if step >= output_ids.dim(0)? {
            return Err(Error::InvalidShape(format!(
                "step {step} is outside output_ids with {} rows",
                output_ids.dim(0)?
            )));
        }
        let end = ctx.param_offset() + ctx.local_batch_size;
        if end > self.buffers.batch_size() || end > ctx.batch_size {
            return Err(Error::InvalidShape(format!(
                "iteration {ite} covers requests [{}, {end}) but setup prepared {} of {}",
                ctx.param_offset(),
                self.buffers.batch_size(),
                ctx.batch_size
            )));
        }

        tracing::debug!(
            step,
            ite,
            local_batch_size = ctx.local_batch_size,
            batch_size = ctx.batch_size,
            "top-k sampling execute"
        );
        Ok(ctx)
    }

    fn read_index(&self, tensor: &B::Tensor, name: &str) -> Result<usize> {
        let value = self.backend.read_scalar_i32(tensor)?;
        usize::try_from(value)
            .map_err(|_| Error::InvalidShape(format!("{name} must be non-negative, got {value}")))
    }

    /// Move tensors out of the maps, launch, and put them back even when
    /// the launch fails. Staged logits are consumed.
    fn run_step(
        &mut self,
        ctx: DecodeStepContext,
        inputs: &mut TensorMap<B::Tensor>,
        outputs: &mut TensorMap<B::Tensor>,
    ) -> Result<()> {
        let staged = self.staged_logits.take();
        let from_inputs = staged.is_none();
        let mut logits = match staged {
            Some(logits) => logits,
            None => inputs.take_required(LOGITS)?,
        };
        let mut out = match StepOutputs::take_from(outputs) {
            Ok(out) => out,
            Err(e) => {
                if from_inputs {
                    inputs.insert(LOGITS, logits);
                }
                return Err(e);
            }
        };

        let result = inputs
            .require(END_ID)
            .and_then(|end_ids| self.sample(ctx, &mut logits, end_ids, &mut out));

        out.restore(outputs);
        if from_inputs {
            inputs.insert(LOGITS, logits);
        }
        result
    }

    fn sample(
        &mut self,
        ctx: DecodeStepContext,
        logits: &mut B::Tensor,
        end_ids: &B::Tensor,
        out: &mut StepOutputs<B::Tensor>,
    ) -> Result<()> {
        let vocab_size = self.config.vocab_size;
        self.backend
            .add_end_mask(logits, end_ids, out.finished.as_ref(), vocab_size)?;
        self.backend.sync_check()?;

        let logits_are_probs = out.wants_log_probs();
        if logits_are_probs {
            self.backend.softmax(logits, vocab_size)?;
        }

        let views = self.buffers.views()?;
        self.backend.batch_top_k_sample(TopKSampleArgs {
            workspace: views.workspace,
            logits,
            logits_are_probs,
            output_ids: &mut out.output_ids,
            output_offset: ctx.output_offset(),
            sequence_length: out.sequence_length.as_mut(),
            finished: out.finished.as_mut(),
            cum_log_probs: out.cum_log_probs.as_mut(),
            output_log_probs: out.output_log_probs.as_mut(),
            sampled_logprobs: out.sampled_logprobs.as_mut(),
            sampled_indexes: out.sampled_indexes.as_mut(),
            sampled_nums: out.sampled_nums.as_mut(),
            rand_states: &mut out.random_state,
            max_top_k: self.state.runtime_max_top_k,
            top_ks: views.top_k,
            top_ps: views.top_p,
            skip_decode: views.skip_decode,
            param_offset: ctx.param_offset(),
            vocab_size,
            end_ids,
            local_batch_size: ctx.local_batch_size,
        })?;
        self.backend.sync_check()
    }
}
