//! Hashing primitives for the dat document store.
//!
//! Provides domain-separated BLAKE3 hashing, both one-shot and incremental.
//! Blob hashes are computed while bytes stream through a writer, so a blob
//! never has to be buffered whole just to learn its identity.
//!
//! All crypto operations wrap established libraries — no custom cryptography.

pub mod hasher;

pub use hasher::{ContentHasher, StreamingHasher};
