//! Host-visible configuration for a sampling layer instance.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest candidate-set size the batched top-k kernel is driven with.
///
/// Requested `top_k` values above this are clamped with a warning.
// The kernel header documents 64 as its supported maximum while 1024 is
// what gets enforced here; confirm against the kernel in use before
// raising or lowering this.
pub const TOP_K_MAX: u32 = 1024;

/// Configuration for [`TopKSamplingLayer`](crate::layer::TopKSamplingLayer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Maximum number of request slots in a batch.
    pub max_batch_size: usize,
    /// Number of real vocabulary entries per logits row.
    pub vocab_size: usize,
    /// Row stride of the logits tensor (`>= vocab_size`).
    pub vocab_size_padded: usize,
    /// Upper bound for resolved `top_k` (K_MAX).
    pub top_k_max: u32,
    /// Temperature used when a setup call carries none.
    pub temperature: f32,
    /// Repetition penalty used when a setup call carries none.
    pub repetition_penalty: f32,
    /// Seed used when a setup call carries none.
    pub random_seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            vocab_size: 32_000,
            vocab_size_padded: 32_000,
            top_k_max: TOP_K_MAX,
            temperature: 1.0,
            repetition_penalty: 1.0,
            random_seed: 0,
        }
    }
}

impl SamplingConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting config fails [`SamplingConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be > 0".into()));
        }
        if self.vocab_size == 0 {
            return Err(Error::InvalidConfig("vocab_size must be > 0".into()));
        }
        if self.vocab_size_padded < self.vocab_size {
            return Err(Error::InvalidConfig(format!(
                "vocab_size_padded ({}) < vocab_size ({})",
                self.vocab_size_padded, self.vocab_size
            )));
        }
        if self.top_k_max == 0 {
            return Err(Error::InvalidConfig("top_k_max must be > 0".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_vocab(mut self, vocab_size: usize, vocab_size_padded: usize) -> Self {
        self.vocab_size = vocab_size;
        self.vocab_size_padded = vocab_size_padded;
        self
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    #[must_use]
    pub fn with_top_k_max(mut self, top_k_max: u32) -> Self {
        self.top_k_max = top_k_max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        let cfg = SamplingConfig::default().with_vocab(100, 128);
        let json = serde_json::to_string(&cfg).unwrap();
        let decoded: SamplingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, decoded);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let cfg: SamplingConfig = serde_json::from_str(r#"{"vocab_size": 10}"#).unwrap();
        assert_eq!(cfg.vocab_size, 10);
        assert_eq!(cfg.top_k_max, TOP_K_MAX);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_padding() {
        let cfg = SamplingConfig::default().with_vocab(100, 64);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_k_max() {
        let cfg = SamplingConfig::default().with_top_k_max(0);
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!(
            "infernum-sampling-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"vocab_size": 50, "vocab_size_padded": 64, "top_k_max": 64}"#)
            .unwrap();
        let cfg = SamplingConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.vocab_size_padded, 64);
        assert_eq!(cfg.top_k_max, 64);
    }

    #[test]
    fn test_from_file_missing() {
        let err = SamplingConfig::from_file("/nonexistent/sampling.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
