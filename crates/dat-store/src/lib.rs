//! Versioned document store for dat.
//!
//! Every document lives under a unique key and carries a version counter
//! that starts at 1 and grows by exactly 1 per successful update. Writers
//! use optimistic concurrency: an update must name the version it read, and
//! a write that does not know the current version never overwrites state.
//!
//! # Modules
//!
//! - [`error`] — [`StoreError`], including the [`Conflict`] report
//! - [`types`] — [`DocumentWrite`] and [`Committed`]
//! - [`traits`] — the [`DocumentStore`] trait
//! - [`versioned`] — [`VersionedStore`], the in-memory implementation with an
//!   optional [`Journal`] for durability
//! - [`journal`] — append-only, CRC-framed commit journal

pub mod error;
pub mod journal;
pub mod traits;
pub mod types;
pub mod versioned;

pub use error::{Conflict, StoreError, StoreResult};
pub use journal::{Journal, JournalConfig, JournalRecord, SyncMode};
pub use traits::{DocumentStore, Scan, ValueScan};
pub use types::{Committed, DocumentWrite};
pub use versioned::VersionedStore;
