use std::io;

use dat_types::BlobHash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so blob hashes and key digests never share a value space
/// even for identical input bytes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for attachment blobs.
    pub const BLOB: Self = Self {
        domain: "dat-blob-v1",
    };
    /// Hasher for composite primary keys.
    pub const KEY: Self = Self {
        domain: "dat-key-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> BlobHash {
        let mut hasher = self.streaming();
        hasher.update(data);
        hasher.finalize().0
    }

    /// Hex digest of `data`, always [`BlobHash::HEX_LEN`] characters long.
    pub fn hex_digest(&self, data: &[u8]) -> String {
        self.hash(data).to_hex()
    }

    /// Start an incremental hash computation in this domain.
    pub fn streaming(&self) -> StreamingHasher {
        let mut inner = blake3::Hasher::new();
        inner.update(self.domain.as_bytes());
        inner.update(b":");
        StreamingHasher { inner, size: 0 }
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &BlobHash) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Running hash and byte counter over a stream of chunks.
///
/// The domain prefix is not counted in [`StreamingHasher::size`].
pub struct StreamingHasher {
    inner: blake3::Hasher,
    size: u64,
}

impl StreamingHasher {
    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes fed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish the computation, returning the hash and total byte count.
    pub fn finalize(&self) -> (BlobHash, u64) {
        (BlobHash::from_hash(*self.inner.finalize().as_bytes()), self.size)
    }
}

impl io::Write for StreamingHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_deterministic() {
        let id1 = ContentHasher::BLOB.hash(b"hello world");
        let id2 = ContentHasher::BLOB.hash(b"hello world");
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let blob = ContentHasher::BLOB.hash(b"same content");
        let key = ContentHasher::KEY.hash(b"same content");
        assert_ne!(blob, key);
    }

    #[test]
    fn verify_correct_and_tampered_data() {
        let id = ContentHasher::BLOB.hash(b"original");
        assert!(ContentHasher::BLOB.verify(b"original", &id));
        assert!(!ContentHasher::BLOB.verify(b"tampered", &id));
    }

    #[test]
    fn hex_digest_has_fixed_length() {
        assert_eq!(ContentHasher::KEY.hex_digest(b"").len(), BlobHash::HEX_LEN);
        assert_eq!(
            ContentHasher::KEY.hex_digest(&[b'x'; 4096]).len(),
            BlobHash::HEX_LEN
        );
    }

    #[test]
    fn streaming_counts_bytes() {
        let mut hasher = ContentHasher::BLOB.streaming();
        hasher.update(b"abc");
        hasher.update(b"");
        hasher.update(b"defg");
        assert_eq!(hasher.size(), 7);
        let (hash, size) = hasher.finalize();
        assert_eq!(size, 7);
        assert_eq!(hash, ContentHasher::BLOB.hash(b"abcdefg"));
    }

    #[test]
    fn io_write_feeds_the_hash() {
        use std::io::Write;

        let mut hasher = ContentHasher::BLOB.streaming();
        hasher.write_all(b"written through io").unwrap();
        assert_eq!(
            hasher.finalize().0,
            ContentHasher::BLOB.hash(b"written through io")
        );
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_the_hash(data in proptest::collection::vec(any::<u8>(), 0..512), split in 0usize..512) {
            let split = split.min(data.len());
            let mut hasher = ContentHasher::BLOB.streaming();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            let (hash, size) = hasher.finalize();
            prop_assert_eq!(hash, ContentHasher::BLOB.hash(&data));
            prop_assert_eq!(size, data.len() as u64);
        }
    }
}
