//! CPU backend for Infernum sampling.
//!
//! Implements every op trait of `infernum-sampling` on the host. Each
//! [`CpuBackend`] value models one device with one in-order stream: ops run
//! synchronously in call order, and a fault detected inside a kernel is
//! only reported at the next [`sync_check`](Backend::sync_check), as it
//! would be on an accelerator.
//!
//! This backend is intended for testing and for running the sampling layer
//! on machines without a GPU. It is not optimised for throughput.

#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod buffer;
pub mod ops;
pub mod tensor;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use infernum_sampling::backend::Backend;
use infernum_sampling::{Error, Result};

pub use buffer::CpuBuffer;
pub use tensor::CpuTensor;

/// Counters shared by every clone of a [`CpuBackend`].
#[derive(Debug, Default)]
struct Counters {
    allocations: AtomicUsize,
    frees: AtomicUsize,
    live_bytes: AtomicUsize,
    h2d_copies: AtomicUsize,
    h2d_bytes: AtomicUsize,
    launches: AtomicUsize,
    syncs: AtomicUsize,
}

/// Point-in-time copy of the backend's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStats {
    /// Fresh allocations (same-size reallocations are reused and not counted).
    pub allocations: usize,
    pub frees: usize,
    /// Bytes currently allocated.
    pub live_bytes: usize,
    /// Host-to-device copies enqueued.
    pub h2d_copies: usize,
    pub h2d_bytes: usize,
    /// Sampling kernel launches.
    pub launches: usize,
    pub syncs: usize,
}

/// The CPU device handle.
///
/// Clones share counters, the memory limit and the pending-fault slot, so a
/// test can keep a clone to observe a backend owned by a layer.
#[derive(Clone, Debug, Default)]
pub struct CpuBackend {
    counters: Arc<Counters>,
    fault: Arc<Mutex<Option<String>>>,
    memory_limit: Option<usize>,
}

impl CpuBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations that would take live memory above `bytes`.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    #[must_use]
    pub fn stats(&self) -> CpuStats {
        let c = &self.counters;
        CpuStats {
            allocations: c.allocations.load(Ordering::Relaxed),
            frees: c.frees.load(Ordering::Relaxed),
            live_bytes: c.live_bytes.load(Ordering::Relaxed),
            h2d_copies: c.h2d_copies.load(Ordering::Relaxed),
            h2d_bytes: c.h2d_bytes.load(Ordering::Relaxed),
            launches: c.launches.load(Ordering::Relaxed),
            syncs: c.syncs.load(Ordering::Relaxed),
        }
    }

    /// Record a kernel fault; the first one is reported by the next
    /// `sync_check`.
    pub(crate) fn record_fault(&self, message: String) {
        tracing::error!(%message, "kernel fault");
        if let Ok(mut slot) = self.fault.lock() {
            slot.get_or_insert(message);
        }
    }
}

impl Backend for CpuBackend {
    type Tensor = CpuTensor;
    type Buffer = CpuBuffer;

    fn sync_check(&self) -> Result<()> {
        self.counters.syncs.fetch_add(1, Ordering::Relaxed);
        let mut slot = self
            .fault
            .lock()
            .map_err(|_| Error::Device("fault slot poisoned".into()))?;
        match slot.take() {
            Some(message) => Err(Error::Device(message)),
            None => Ok(()),
        }
    }
}
