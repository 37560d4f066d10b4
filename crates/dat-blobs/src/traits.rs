use std::io::{self, Read, Write};

use dat_crypto::ContentHasher;
use dat_types::{Attachment, BlobHash};
use tracing::warn;

use crate::error::{BlobError, BlobResult};

/// Lazy byte source for a stored blob.
pub type BlobReader = Box<dyn Read + Send>;

/// Scoped write target for one blob.
///
/// Bytes written are persisted and hashed incrementally. Nothing becomes
/// visible in the store until [`BlobSink::finish`] returns successfully.
pub trait BlobSink: Write + Send {
    /// Seal the blob and return its `{hash, size}`.
    fn finish(self: Box<Self>) -> BlobResult<Attachment>;
}

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written; the same bytes always produce the
///   same hash.
/// - A single blob write is all-or-nothing.
/// - Concurrent reads are always safe.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Open a sink for a new blob. `name` is only used for diagnostics.
    fn open_write(&self, name: &str) -> BlobResult<Box<dyn BlobSink>>;

    /// Open a reader over the bytes stored under `hash`.
    ///
    /// Returns [`BlobError::NotFound`] if no such blob exists.
    fn open_read(&self, hash: &BlobHash) -> BlobResult<BlobReader>;

    /// Check whether a blob exists.
    fn contains(&self, hash: &BlobHash) -> BlobResult<bool>;

    /// Check whether a blob exists given its hex hash.
    ///
    /// Malformed hashes and backend failures both answer `false`.
    fn exists(&self, hash: &str) -> bool {
        let Ok(hash) = BlobHash::from_hex(hash) else {
            return false;
        };
        self.contains(&hash).unwrap_or_else(|e| {
            warn!(%hash, error = %e, "blob existence check failed");
            false
        })
    }

    /// Stream everything from `reader` into a new blob.
    fn write_from(&self, name: &str, reader: &mut dyn Read) -> BlobResult<Attachment> {
        let mut sink = self.open_write(name)?;
        io::copy(reader, &mut sink)?;
        sink.finish()
    }

    /// Read a whole blob into memory.
    fn read_to_vec(&self, hash: &BlobHash) -> BlobResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read(hash)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Re-hash a stored blob and compare against its identity.
    fn verify(&self, hash: &BlobHash) -> BlobResult<Attachment> {
        let mut reader = self.open_read(hash)?;
        let mut hasher = ContentHasher::BLOB.streaming();
        io::copy(&mut reader, &mut hasher)?;
        let (computed, size) = hasher.finalize();
        if computed != *hash {
            return Err(BlobError::HashMismatch {
                expected: *hash,
                computed,
            });
        }
        Ok(Attachment::new(computed, size))
    }
}
