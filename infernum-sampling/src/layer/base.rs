//! Temperature, repetition penalty and random-state seeding shared by
//! sampling layers.

use crate::backend::{AllocatorOps, LogitsOps, PenaltyArgs, RandomStateOps, TransferOps};
use crate::config::SamplingConfig;
use crate::dtype::LogitDType;
use crate::host_buffer::HostBuffer;
use crate::runtime_args::{ArgSource, RuntimeArgs};
use crate::{Error, Result};

/// Smallest temperature applied; lower requests are raised to it.
const MIN_TEMPERATURE: f32 = 1e-6;

/// Per-request penalty parameters and pending random seeds.
pub struct SamplingBase<B: AllocatorOps> {
    default_temperature: f32,
    default_repetition_penalty: f32,
    default_seed: u64,
    h_temperature: HostBuffer<f32>,
    h_repetition_penalty: HostBuffer<f32>,
    h_seed: HostBuffer<u64>,
    h_seed_pending: HostBuffer<bool>,
    temperature: Option<B::Buffer>,
    repetition_penalty: Option<B::Buffer>,
    batch_size: usize,
}

impl<B: AllocatorOps + TransferOps> SamplingBase<B> {
    #[must_use]
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            default_temperature: config.temperature,
            default_repetition_penalty: config.repetition_penalty,
            default_seed: config.random_seed,
            h_temperature: HostBuffer::new(),
            h_repetition_penalty: HostBuffer::new(),
            h_seed: HostBuffer::new(),
            h_seed_pending: HostBuffer::new(),
            temperature: None,
            repetition_penalty: None,
            batch_size: 0,
        }
    }

    /// Resolve `temperature`, `repetition_penalty` and `random_seed` for
    /// `batch_size` requests and stage the penalties on the device.
    ///
    /// Random states are re-seeded on the next [`apply`](Self::apply) when
    /// `random_seed` is given or the batch size changed since the last
    /// `setup` (including the first one).
    ///
    /// # Errors
    /// Returns `RuntimeArgSize` for a malformed argument, or propagates
    /// allocator/transfer failures.
    pub fn setup(&mut self, backend: &B, batch_size: usize, args: &RuntimeArgs) -> Result<()> {
        let temperature = ArgSource::from_values("temperature", &args.temperature, batch_size)?;
        let penalty =
            ArgSource::from_values("repetition_penalty", &args.repetition_penalty, batch_size)?;
        let seed = ArgSource::from_values("random_seed", &args.random_seed, batch_size)?;

        self.h_temperature.ensure_len(batch_size);
        self.h_repetition_penalty.ensure_len(batch_size);
        self.h_seed.ensure_len(batch_size);
        self.h_seed_pending.ensure_len(batch_size);

        for i in 0..batch_size {
            let t = temperature.get(i, self.default_temperature);
            let t = if t.is_nan() || t < MIN_TEMPERATURE {
                tracing::warn!(request = i, requested = t, "temperature must be > 0, clipping");
                MIN_TEMPERATURE
            } else {
                t
            };
            self.h_temperature.prefix_mut(batch_size)[i] = t;
            self.h_repetition_penalty.prefix_mut(batch_size)[i] =
                penalty.get(i, self.default_repetition_penalty);
            self.h_seed.prefix_mut(batch_size)[i] = seed.get(i, self.default_seed);
        }
        // Explicit seeds and new batch shapes restart the generators; otherwise
        // each request keeps drawing from where its state left off.
        if !seed.is_absent() || self.batch_size != batch_size {
            self.h_seed_pending.fill(true);
        }

        if self.batch_size != batch_size
            || self.temperature.is_none()
            || self.repetition_penalty.is_none()
        {
            let bytes = batch_size * std::mem::size_of::<f32>();
            self.batch_size = 0;
            self.temperature = Some(backend.realloc(self.temperature.take(), bytes)?);
            self.repetition_penalty =
                Some(backend.realloc(self.repetition_penalty.take(), bytes)?);
            self.batch_size = batch_size;
        }

        let (Some(d_temperature), Some(d_penalty)) =
            (self.temperature.as_mut(), self.repetition_penalty.as_mut())
        else {
            return Err(Error::Other("penalty buffers missing after allocation".into()));
        };
        backend.copy_h2d(d_temperature, self.h_temperature.prefix(batch_size))?;
        backend.copy_h2d(d_penalty, self.h_repetition_penalty.prefix(batch_size))?;
        backend.sync_check()
    }

    /// Seed pending random states for local requests
    /// `[offset, offset + local_batch_size)`, then apply repetition penalty
    /// and temperature to `logits`.
    ///
    /// # Errors
    /// Returns an error if `setup` has not run for a large enough batch, or
    /// propagates backend failures.
    #[allow(clippy::too_many_arguments)]
    pub fn apply<T: LogitDType>(
        &mut self,
        backend: &B,
        logits: &mut B::Tensor,
        rand_states: &mut B::Tensor,
        output_ids: &B::Tensor,
        step: usize,
        offset: usize,
        local_batch_size: usize,
        vocab_size: usize,
    ) -> Result<()>
    where
        B: LogitsOps<T> + RandomStateOps,
    {
        let end = offset + local_batch_size;
        if end > self.batch_size {
            return Err(Error::InvalidShape(format!(
                "requests [{offset}, {end}) exceed the configured batch of {}",
                self.batch_size
            )));
        }

        let pending = &mut self.h_seed_pending.prefix_mut(end)[offset..];
        if pending.iter().any(|&p| p) {
            backend.init_rand_states(rand_states, offset, &self.h_seed.prefix(end)[offset..])?;
            pending.fill(false);
            backend.sync_check()?;
        }

        let (Some(temperatures), Some(repetition_penalties)) =
            (self.temperature.as_ref(), self.repetition_penalty.as_ref())
        else {
            return Err(Error::Other("penalty buffers are not allocated".into()));
        };
        backend.apply_penalties(
            logits,
            PenaltyArgs {
                temperatures,
                repetition_penalties,
                param_offset: offset,
                output_ids,
                step,
                id_offset: offset,
                vocab_size,
            },
        )?;
        backend.sync_check()
    }

    /// Per-request temperatures resolved by the last `setup`.
    #[must_use]
    pub fn temperatures(&self) -> &[f32] {
        self.h_temperature.prefix(self.batch_size)
    }

    /// Per-request repetition penalties resolved by the last `setup`.
    #[must_use]
    pub fn repetition_penalties(&self) -> &[f32] {
        self.h_repetition_penalty.prefix(self.batch_size)
    }
}

impl<B: AllocatorOps> SamplingBase<B> {
    /// Free device buffers. Safe to call repeatedly.
    pub fn free(&mut self, backend: &B) {
        for buffer in [self.temperature.take(), self.repetition_penalty.take()]
            .into_iter()
            .flatten()
        {
            backend.free(buffer);
        }
        self.batch_size = 0;
    }
}
