use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use dat_crypto::{ContentHasher, StreamingHasher};
use dat_types::{Attachment, BlobHash};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::traits::{BlobReader, BlobSink, BlobStore};

/// Filesystem blob store.
///
/// Each blob lives in its own file at `<root>/<first 2 hex>/<remaining hex>`.
/// Sinks stage bytes in a temporary file inside `root` and atomically rename
/// it into place on finish, so a crashed or abandoned write never leaves a
/// partial blob under a valid hash.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    sync: bool,
}

impl FsBlobStore {
    /// Open (or create) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, sync: false })
    }

    /// `fsync` every blob before it becomes visible.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of a blob.
    pub fn path_for(&self, hash: &BlobHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }
}

impl BlobStore for FsBlobStore {
    fn open_write(&self, name: &str) -> BlobResult<Box<dyn BlobSink>> {
        let staged = NamedTempFile::new_in(&self.root)?;
        Ok(Box::new(FsSink {
            name: name.to_string(),
            store: self.clone(),
            writer: BufWriter::new(staged),
            hasher: ContentHasher::BLOB.streaming(),
        }))
    }

    fn open_read(&self, hash: &BlobHash) -> BlobResult<BlobReader> {
        match File::open(self.path_for(hash)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(*hash)),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, hash: &BlobHash) -> BlobResult<bool> {
        Ok(self.path_for(hash).try_exists()?)
    }
}

struct FsSink {
    name: String,
    store: FsBlobStore,
    writer: BufWriter<NamedTempFile>,
    hasher: StreamingHasher,
}

impl Write for FsSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl BlobSink for FsSink {
    fn finish(self: Box<Self>) -> BlobResult<Attachment> {
        let FsSink {
            name,
            store,
            writer,
            hasher,
        } = *self;
        let staged = writer.into_inner().map_err(|e| e.into_error())?;
        if store.sync {
            staged.as_file().sync_all()?;
        }

        let (hash, size) = hasher.finalize();
        let target = store.path_for(&hash);
        if target.try_exists()? {
            // Identical content already stored; the staged copy is dropped.
            debug!(%name, %hash, "blob already present");
            return Ok(Attachment::new(hash, size));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        staged.persist(&target).map_err(|e| BlobError::Io(e.error))?;

        debug!(%name, %hash, size, path = %target.display(), "blob stored");
        Ok(Attachment::new(hash, size))
    }
}
