//! Streaming ingestion for the dat document store.
//!
//! Raw input flows through three stages:
//!
//! 1. [`normalize`] turns CSV/TSV, line-delimited JSON or binary rows into
//!    ordered field mappings, chunk by chunk. Each mapping is lifted into a
//!    [`Draft`](dat_types::Draft).
//! 2. [`key`] derives each draft's primary key from the configured strategy.
//! 3. [`pipeline`] writes declared attachments to the blob store and commits
//!    the document, yielding one [`IngestEvent`] per item.
//!
//! A stream is strictly sequential: item *n + 1* is not touched before item
//! *n*'s commit outcome is known. Independent streams may run concurrently
//! against the same stores.

pub mod config;
pub mod error;
pub mod key;
pub mod normalize;
pub mod pipeline;

pub use config::{ColumnSpec, FieldType, Format, IngestConfig, Primary, PrimaryFormat};
pub use error::{IngestError, IngestResult};
pub use key::{KeyInput, KeyResolver};
pub use normalize::{encode_row, normalizer_for, RowNormalizer};
pub use pipeline::{IngestEvent, IngestHandle, IngestStream, IngestSummary, Ingestor};
