//! Error types for document store operations.

use std::fmt;
use std::sync::Arc;

use dat_types::Document;
use thiserror::Error;

use crate::types::DocumentWrite;

/// A rejected write against an existing key.
///
/// Raised when the writer's expected version differs from the stored one,
/// or when a write without any expected version targets an existing key.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// The document as currently stored.
    pub current: Arc<Document>,
    /// The write that was rejected.
    pub attempted: DocumentWrite,
}

impl Conflict {
    pub fn key(&self) -> &str {
        &self.current.key
    }

    pub fn current_version(&self) -> u64 {
        self.current.version
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conflict on {}: stored version is {}", self.key(), self.current_version())?;
        match self.attempted.expected_version {
            Some(v) => write!(f, ", write expected {v}"),
            None => write!(f, ", write carried no version"),
        }
    }
}

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document exists under this key (or at this version).
    #[error("document not found: {key}")]
    NotFound { key: String },

    /// Optimistic concurrency check failed; the store is unchanged.
    #[error("{0}")]
    Conflict(Box<Conflict>),

    /// A column set differs from the one already established in this store.
    #[error("column mismatch: expected {expected:?}, got {actual:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// I/O failure in the persistence layer.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A journal record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
