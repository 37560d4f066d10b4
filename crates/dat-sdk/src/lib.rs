//! High-level API for the dat document store.
//!
//! [`Dat`] bundles a versioned document store, a content-addressed blob
//! store and the ingestion pipeline behind one cloneable handle. It is the
//! main entry point for applications embedding dat, and what the `dat`
//! command line drives.

pub mod attachment;
pub mod config;
pub mod error;
pub mod repository;

pub use attachment::{AttachmentTarget, AttachmentWrite};
pub use config::DatConfig;
pub use error::{DatError, DatResult};
pub use repository::Dat;

// Re-export key types
pub use dat_blobs::BlobReader;
pub use dat_ingest::{
    ColumnSpec, FieldType, Format, IngestConfig, IngestError, IngestEvent, IngestHandle,
    IngestStream, IngestSummary, Primary,
};
pub use dat_store::{Conflict, DocumentStore};
pub use dat_types::{Attachment, BlobHash, Document, Fields};
