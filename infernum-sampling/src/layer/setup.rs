//! Per-step batch setup.

use crate::backend::SamplingBackend;
use crate::dtype::LogitDType;
use crate::runtime_args::{ArgSource, RuntimeArgs};
use crate::sampling::resolve_into;
use crate::{Error, Result};

use super::TopKSamplingLayer;

impl<T: LogitDType, B: SamplingBackend<T>> TopKSamplingLayer<T, B> {
    /// Prepare the layer for one generation step over `batch_size` requests.
    ///
    /// If no request asks for top-k (`max(runtime_top_k) == 0`) while some
    /// nucleus threshold is set (`min(runtime_top_p) != 0`), the whole step
    /// belongs to the top-p strategy: [`skip_all`](Self::skip_all) is set and
    /// nothing is resolved, allocated or copied.
    ///
    /// Otherwise every request's `(top_k, top_p)` is resolved into the
    /// grow-only host arrays, device buffers are reserved if the batch shape
    /// or its largest `k` changed, and the resolved arrays are copied to the
    /// device.
    ///
    /// # Errors
    /// Returns `InvalidShape` if `batch_size` exceeds the configured maximum,
    /// `RuntimeArgSize` for a malformed runtime argument, or propagates
    /// allocator and transfer failures.
    pub fn setup(&mut self, batch_size: usize, args: &RuntimeArgs) -> Result<()> {
        tracing::debug!(batch_size, "top-k sampling setup");

        let max_top_k = args.max_top_k();
        let min_top_p = args.min_top_p();
        self.state.skip_all = false;
        #[allow(clippy::float_cmp)]
        if max_top_k == 0 && min_top_p != 0.0 {
            tracing::debug!(min_top_p, "no request uses top-k, deferring step to top-p");
            self.state.skip_all = true;
            return Ok(());
        }

        if batch_size > self.config.max_batch_size {
            return Err(Error::InvalidShape(format!(
                "batch_size ({batch_size}) exceeds max_batch_size ({})",
                self.config.max_batch_size
            )));
        }
        let top_k = ArgSource::from_values("runtime_top_k", &args.runtime_top_k, batch_size)?;
        let top_p = ArgSource::from_values("runtime_top_p", &args.runtime_top_p, batch_size)?;

        self.base.setup(&self.backend, batch_size, args)?;

        let state = &mut self.state;
        state.h_top_k.ensure_len(batch_size);
        state.h_top_p.ensure_len(batch_size);
        state.h_skip_decode.ensure_len(batch_size);
        state.warnings = resolve_into(
            &top_k,
            &top_p,
            self.config.top_k_max,
            state.h_top_k.prefix_mut(batch_size),
            state.h_top_p.prefix_mut(batch_size),
            state.h_skip_decode.prefix_mut(batch_size),
        );
        state.runtime_max_top_k = state
            .h_top_k
            .prefix(batch_size)
            .iter()
            .copied()
            .max()
            .unwrap_or(0);
        state.batch_size = batch_size;

        if self
            .buffers
            .needs_reserve(batch_size, self.state.runtime_max_top_k)
        {
            self.buffers.reserve(
                &self.backend,
                batch_size,
                self.state.h_top_k.prefix(batch_size),
                self.config.vocab_size_padded,
            )?;
        }

        let (d_top_k, d_top_p, d_skip) = self.buffers.params_mut()?;
        self.backend
            .copy_h2d(d_top_k, self.state.h_top_k.prefix(batch_size))?;
        self.backend
            .copy_h2d(d_top_p, self.state.h_top_p.prefix(batch_size))?;
        self.backend
            .copy_h2d(d_skip, self.state.h_skip_decode.prefix(batch_size))?;
        self.backend.sync_check()
    }
}
