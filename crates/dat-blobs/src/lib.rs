//! Content-addressed attachment storage for the dat document store.
//!
//! Attachments are immutable blobs identified by the BLAKE3 hash of their
//! bytes. Writers stream bytes into a [`BlobSink`]; the hash and size are
//! computed incrementally and returned when the sink is finished. Documents
//! merely reference blobs by `{hash, size}`.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBlobStore`] -- one file per blob under a fan-out directory
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written.
//! 2. A blob becomes visible only when its sink finishes; a dropped sink
//!    leaves no blob behind.
//! 3. Identical content collapses into one stored object.
//! 4. `exists` never fails for malformed input, it answers `false`.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{BlobError, BlobResult};
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;
pub use traits::{BlobReader, BlobSink, BlobStore};
