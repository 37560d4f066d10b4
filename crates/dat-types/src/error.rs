use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("invalid `{field}` field: {reason}")]
    InvalidField { field: String, reason: String },
}
