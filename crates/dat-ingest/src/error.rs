//! Error types for ingestion.

use std::io;

use dat_blobs::BlobError;
use dat_store::StoreError;
use dat_types::TypeError;
use thiserror::Error;

/// Errors raised while ingesting a stream.
///
/// Item-level errors skip one document and let the stream continue; fatal
/// errors end the stream. See [`IngestError::is_fatal`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// Key resolution referenced a field the draft does not have.
    #[error("missing primary key field `{field}`")]
    MissingField { field: String },

    /// A tabular record does not match the established columns.
    #[error("column mismatch at record {record}: expected {expected:?}, found {found:?}")]
    ColumnMismatch {
        record: u64,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Input could not be decoded in the configured format.
    #[error("parse error at record {record}: {reason}")]
    Parse { record: u64, reason: String },

    /// A draft carries malformed reserved fields.
    #[error("invalid document: {0}")]
    InvalidDraft(#[from] TypeError),

    /// A declared attachment could not be read.
    #[error("attachment `{name}`: {source}")]
    Attachment {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The ingestion configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Reading the input stream failed.
    #[error("input error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl IngestError {
    /// Whether this error ends the stream rather than a single item.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MissingField { .. } | Self::InvalidDraft(_) | Self::Attachment { .. } => false,
            Self::Blob(BlobError::NotFound(_)) => false,
            Self::Store(StoreError::Conflict(_) | StoreError::NotFound { .. }) => false,
            Self::ColumnMismatch { .. }
            | Self::Parse { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Store(_)
            | Self::Blob(_) => true,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missingField",
            Self::ColumnMismatch { .. } => "columnMismatch",
            Self::Parse { .. } => "parse",
            Self::InvalidDraft(_) => "invalidDocument",
            Self::Attachment { .. } => "attachment",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Store(StoreError::Conflict(_)) => "conflict",
            Self::Store(StoreError::NotFound { .. }) | Self::Blob(BlobError::NotFound(_)) => {
                "notFound"
            }
            Self::Store(_) | Self::Blob(_) => "storage",
        }
    }
}

/// Convenience alias used throughout the ingest crate.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
