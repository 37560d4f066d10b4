use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, RwLock};

use bytes::{Bytes, BytesMut};
use dat_crypto::{ContentHasher, StreamingHasher};
use dat_types::{Attachment, BlobHash};
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::traits::{BlobReader, BlobSink, BlobStore};

type BlobMap = Arc<RwLock<HashMap<BlobHash, Bytes>>>;

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Blob bytes are reference-counted, so
/// readers never copy the stored content.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: BlobMap,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn open_write(&self, name: &str) -> BlobResult<Box<dyn BlobSink>> {
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            blobs: Arc::clone(&self.blobs),
            buffer: BytesMut::new(),
            hasher: ContentHasher::BLOB.streaming(),
        }))
    }

    fn open_read(&self, hash: &BlobHash) -> BlobResult<BlobReader> {
        let blobs = self.blobs.read().expect("lock poisoned");
        let bytes = blobs.get(hash).cloned().ok_or(BlobError::NotFound(*hash))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn contains(&self, hash: &BlobHash) -> BlobResult<bool> {
        Ok(self.blobs.read().expect("lock poisoned").contains_key(hash))
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

struct MemorySink {
    name: String,
    blobs: BlobMap,
    buffer: BytesMut,
    hasher: StreamingHasher,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobSink for MemorySink {
    fn finish(self: Box<Self>) -> BlobResult<Attachment> {
        let MemorySink {
            name,
            blobs,
            buffer,
            hasher,
        } = *self;
        let (hash, size) = hasher.finalize();
        blobs
            .write()
            .expect("lock poisoned")
            .entry(hash)
            .or_insert_with(|| buffer.freeze());
        debug!(%name, %hash, size, "blob stored");
        Ok(Attachment::new(hash, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &InMemoryBlobStore, data: &[u8]) -> Attachment {
        store.write_from("test", &mut &data[..]).unwrap()
    }

    #[test]
    fn write_and_read_back() {
        let store = InMemoryBlobStore::new();
        let attachment = put(&store, b"hello world");
        assert_eq!(attachment.size, 11);
        assert_eq!(store.read_to_vec(&attachment.hash).unwrap(), b"hello world");
    }

    #[test]
    fn chunked_writes_hash_like_one_write() {
        let store = InMemoryBlobStore::new();
        let mut sink = store.open_write("chunks").unwrap();
        sink.write_all(b"hello ").unwrap();
        sink.write_all(b"world").unwrap();
        let chunked = sink.finish().unwrap();
        assert_eq!(chunked.hash, ContentHasher::BLOB.hash(b"hello world"));
    }

    #[test]
    fn same_content_is_stored_once() {
        let store = InMemoryBlobStore::new();
        let a = put(&store, b"identical content");
        let b = put(&store, b"identical content");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unfinished_sink_stores_nothing() {
        let store = InMemoryBlobStore::new();
        let mut sink = store.open_write("abandoned").unwrap();
        sink.write_all(b"partial").unwrap();
        drop(sink);
        assert!(store.is_empty());
    }

    #[test]
    fn exists_checks() {
        let store = InMemoryBlobStore::new();
        let attachment = put(&store, b"present");
        assert!(store.exists(&attachment.hash.to_hex()));
        assert!(!store.exists("not-a-valid-hash"));
        assert!(!store.exists(&ContentHasher::BLOB.hash(b"absent").to_hex()));
    }

    #[test]
    fn read_missing_blob_is_not_found() {
        let store = InMemoryBlobStore::new();
        let hash = ContentHasher::BLOB.hash(b"missing");
        assert!(matches!(store.open_read(&hash), Err(BlobError::NotFound(h)) if h == hash));
    }

    #[test]
    fn verify_recomputes_hash() {
        let store = InMemoryBlobStore::new();
        let attachment = put(&store, b"verify me");
        assert_eq!(store.verify(&attachment.hash).unwrap(), attachment);
    }

    #[test]
    fn empty_blob() {
        let store = InMemoryBlobStore::new();
        let attachment = put(&store, b"");
        assert_eq!(attachment.size, 0);
        assert!(store.read_to_vec(&attachment.hash).unwrap().is_empty());
    }

    #[test]
    fn total_bytes() {
        let store = InMemoryBlobStore::new();
        put(&store, b"12345");
        put(&store, b"123456789");
        assert_eq!(store.total_bytes(), 14);
    }

    #[test]
    fn concurrent_writers_share_the_store() {
        use std::thread;

        let store = InMemoryBlobStore::new();
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || put(&store, &[i; 64]))
            })
            .collect();
        for h in handles {
            let attachment = h.join().expect("thread should not panic");
            assert!(store.contains(&attachment.hash).unwrap());
        }
        assert_eq!(store.len(), 8);
    }
}
