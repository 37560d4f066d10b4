use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] dat_store::StoreError),

    #[error(transparent)]
    Blob(#[from] dat_blobs::BlobError),

    #[error(transparent)]
    Ingest(#[from] dat_ingest::IngestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatError {
    /// The rejected write, if this is an optimistic-concurrency failure.
    pub fn as_conflict(&self) -> Option<&dat_store::Conflict> {
        match self {
            Self::Store(dat_store::StoreError::Conflict(c)) => Some(c),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Store(dat_store::StoreError::NotFound { .. })
                | Self::Blob(dat_blobs::BlobError::NotFound(_))
        )
    }
}

pub type DatResult<T> = Result<T, DatError>;
