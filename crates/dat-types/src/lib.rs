//! Foundation types for the dat document store.
//!
//! Every other dat crate depends on `dat-types`. It defines the shapes that
//! flow between the ingestion pipeline, the versioned document store and the
//! blob store.
//!
//! # Key Types
//!
//! - [`BlobHash`] — content-addressed identifier of an attachment blob
//! - [`Attachment`] — `{hash, size}` reference stored on a document
//! - [`Draft`] — normalized field mapping produced by parsing, before keying
//! - [`Document`] — a committed, versioned document

pub mod blob;
pub mod document;
pub mod error;

pub use blob::{Attachment, BlobHash};
pub use document::{AttachmentSpec, Document, Draft, Fields, RESERVED_FIELDS};
pub use error::TypeError;
