use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use dat_blobs::{BlobReader, BlobStore, FsBlobStore, InMemoryBlobStore};
use dat_ingest::{IngestConfig, IngestHandle, IngestStream, Ingestor};
use dat_store::{DocumentStore, DocumentWrite, Scan, StoreError, ValueScan, VersionedStore};
use dat_types::{Document, Fields};
use serde_json::Value;
use tracing::{debug, info};

use crate::attachment::{AttachmentTarget, AttachmentWrite};
use crate::config::DatConfig;
use crate::error::{DatError, DatResult};

/// High-level handle on one document store and its blob store.
///
/// Cheap to clone; clones share both stores.
#[derive(Clone, Debug)]
pub struct Dat {
    ingestor: Ingestor,
    defaults: IngestConfig,
}

impl Dat {
    /// A purely in-memory instance.
    pub fn in_memory() -> Self {
        Self::with_stores(
            Arc::new(VersionedStore::in_memory()),
            Arc::new(InMemoryBlobStore::new()),
        )
    }

    /// Open (or create) a data directory, reading `dat.toml` if present.
    pub fn open(dir: &Path) -> DatResult<Self> {
        let config = DatConfig::load_from_dir(dir)?;
        Self::open_with(dir, &config)
    }

    /// Open (or create) a data directory with explicit settings.
    pub fn open_with(dir: &Path, config: &DatConfig) -> DatResult<Self> {
        std::fs::create_dir_all(dir)?;
        let store = VersionedStore::open(&dir.join(&config.journal_file), config.journal())?;
        let blobs = FsBlobStore::open(dir.join(&config.blob_dir))?.with_sync(config.sync_writes);
        info!(dir = %dir.display(), documents = store.count(), "dat opened");

        let mut dat = Self::with_stores(Arc::new(store), Arc::new(blobs));
        dat.defaults = config.ingest.clone();
        Ok(dat)
    }

    /// Assemble from arbitrary store implementations.
    pub fn with_stores(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            ingestor: Ingestor::new(store, blobs),
            defaults: IngestConfig::default(),
        }
    }

    // ---- Ingestion ----

    /// Start a lazy ingestion stream over `reader`.
    pub fn ingest<'a, R>(&self, reader: R, config: &IngestConfig) -> IngestStream<'a>
    where
        R: Read + Send + 'a,
    {
        self.ingestor.ingest(reader, config)
    }

    /// Ingest already-parsed JSON objects.
    pub fn ingest_values<'a, I>(&self, values: I, config: &IngestConfig) -> IngestStream<'a>
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'a,
    {
        self.ingestor.ingest_values(values, config)
    }

    /// Run an ingestion stream on the tokio blocking pool.
    pub fn spawn_ingest<R>(&self, reader: R, config: &IngestConfig) -> IngestHandle
    where
        R: Read + Send + 'static,
    {
        self.ingestor.spawn(reader, config)
    }

    /// Ingestion options loaded with this instance.
    pub fn ingest_defaults(&self) -> &IngestConfig {
        &self.defaults
    }

    // ---- Documents ----

    pub fn get(&self, key: &str) -> DatResult<Arc<Document>> {
        Ok(self.store().get(key)?)
    }

    pub fn get_version(&self, key: &str, version: u64) -> DatResult<Arc<Document>> {
        Ok(self.store().get_version(key, version)?)
    }

    pub fn history(&self, key: &str) -> DatResult<Vec<Arc<Document>>> {
        Ok(self.store().history(key)?)
    }

    pub fn scan(&self) -> DatResult<Scan> {
        Ok(self.store().scan()?)
    }

    pub fn scan_values(&self) -> DatResult<ValueScan> {
        Ok(self.store().scan_values()?)
    }

    pub fn count(&self) -> usize {
        self.store().count()
    }

    // ---- Attachments ----

    /// Stream `reader` into the blob store and attach it to a document.
    ///
    /// The owning document is created or updated according to `target`; its
    /// other fields and attachments are kept. If the document commit loses a
    /// version race the blob stays stored but unreferenced.
    pub fn write_attachment(
        &self,
        name: &str,
        reader: &mut dyn Read,
        target: AttachmentTarget,
    ) -> DatResult<AttachmentWrite> {
        let attachment = self.blobs().write_from(name, reader)?;
        let key = target.key.unwrap_or_else(dat_ingest::key::generate);

        let (fields, mut attachments) = match self.store().get(&key) {
            Ok(current) => (current.fields.clone(), current.attachments.clone()),
            Err(StoreError::NotFound { .. }) => (Fields::new(), BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        attachments.insert(name.to_string(), attachment.clone());

        let write = DocumentWrite::new(key, fields)
            .with_attachments(attachments)
            .expecting(target.version);
        let committed = self.store().commit(write)?;
        debug!(
            key = %committed.key,
            version = committed.version,
            %name,
            hash = %attachment.hash,
            "attachment written"
        );

        Ok(AttachmentWrite {
            name: name.to_string(),
            attachment,
            document: self.store().get_version(&committed.key, committed.version)?,
        })
    }

    /// Open the bytes of attachment `name` on the latest version of `key`.
    pub fn read_attachment(&self, key: &str, name: &str) -> DatResult<BlobReader> {
        let document = self.get(key)?;
        let attachment = document
            .attachment(name)
            .ok_or_else(|| DatError::NotFound(format!("attachment `{name}` on {key}")))?;
        Ok(self.blobs().open_read(&attachment.hash)?)
    }

    /// Read attachment `name` on the latest version of `key` into memory.
    pub fn read_attachment_bytes(&self, key: &str, name: &str) -> DatResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_attachment(key, name)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Whether a blob with this hex hash is stored. Never fails.
    pub fn blob_exists(&self, hash: &str) -> bool {
        self.blobs().exists(hash)
    }

    // ---- Accessors ----

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.ingestor.store()
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        self.ingestor.blobs()
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }
}
