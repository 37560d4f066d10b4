use dat_types::BlobHash;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob with this hash exists.
    #[error("blob not found: {0}")]
    NotFound(BlobHash),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {expected}: computed {computed}")]
    HashMismatch {
        expected: BlobHash,
        computed: BlobHash,
    },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;
