//! Per-setup runtime arguments.
//!
//! Each argument is a host array whose length selects its shape: empty means
//! absent, one element is broadcast to every request, and `batch_size`
//! elements give one value per request. Any other length is a caller error.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Named runtime arguments supplied to one `setup` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeArgs {
    pub runtime_top_k: Vec<u32>,
    pub runtime_top_p: Vec<f32>,
    pub temperature: Vec<f32>,
    pub repetition_penalty: Vec<f32>,
    pub random_seed: Vec<u64>,
}

impl RuntimeArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_top_k(mut self, values: impl Into<Vec<u32>>) -> Self {
        self.runtime_top_k = values.into();
        self
    }

    #[must_use]
    pub fn with_top_p(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.runtime_top_p = values.into();
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.temperature = values.into();
        self
    }

    #[must_use]
    pub fn with_repetition_penalty(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.repetition_penalty = values.into();
        self
    }

    #[must_use]
    pub fn with_random_seed(mut self, values: impl Into<Vec<u64>>) -> Self {
        self.random_seed = values.into();
        self
    }

    /// Largest raw `top_k` across the batch, 0 when absent.
    #[must_use]
    pub fn max_top_k(&self) -> u32 {
        self.runtime_top_k.iter().copied().max().unwrap_or(0)
    }

    /// Smallest raw `top_p` across the batch, 0.0 when absent.
    #[must_use]
    pub fn min_top_p(&self) -> f32 {
        self.runtime_top_p
            .iter()
            .copied()
            .reduce(f32::min)
            .unwrap_or(0.0)
    }
}

/// Validated view of one runtime argument for a given batch size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgSource<'a, T> {
    Absent,
    Broadcast(T),
    PerRequest(&'a [T]),
}

impl<'a, T: Copy> ArgSource<'a, T> {
    /// Classify `values` against `batch_size`.
    ///
    /// # Errors
    /// Returns `RuntimeArgSize` if `values` has more than one element but
    /// not exactly `batch_size`.
    pub fn from_values(name: &'static str, values: &'a [T], batch_size: usize) -> Result<Self> {
        match values {
            [] => Ok(Self::Absent),
            [v] => Ok(Self::Broadcast(*v)),
            many if many.len() == batch_size => Ok(Self::PerRequest(many)),
            many => Err(Error::RuntimeArgSize {
                name,
                got: many.len(),
                batch_size,
            }),
        }
    }

    /// Value for request `index`, or `default` when absent.
    ///
    /// # Panics
    /// Panics if `index` is out of range for a per-request source.
    #[must_use]
    pub fn get(&self, index: usize, default: T) -> T {
        match self {
            Self::Absent => default,
            Self::Broadcast(v) => *v,
            Self::PerRequest(values) => values[index],
        }
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}
