//! Error types for the sampling layer

use thiserror::Error;

/// Result type alias using the sampling layer's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sampling-layer operations.
///
/// Every variant is fatal for the generation step that produced it.
/// Clamped sampling parameters are advisory and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Required tensor missing: {0}")]
    MissingTensor(String),

    #[error("{name}.len() ({got}) must be 0, 1 or batch_size ({batch_size})")]
    RuntimeArgSize {
        name: &'static str,
        got: usize,
        batch_size: usize,
    },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    #[error("Allocation error: {0}")]
    Alloc(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Sampling workspace too small: required {required} bytes, got {got}")]
    WorkspaceTooSmall { required: usize, got: usize },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_arg_size_message() {
        let e = Error::RuntimeArgSize {
            name: "runtime_top_k",
            got: 3,
            batch_size: 4,
        };
        assert_eq!(
            e.to_string(),
            "runtime_top_k.len() (3) must be 0, 1 or batch_size (4)"
        );
    }

    #[test]
    fn test_json_error_converts() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let e: Error = parse.into();
        assert!(matches!(e, Error::Json(_)));
    }
}
