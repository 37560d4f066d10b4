//! The ingestion pipeline: normalize, resolve keys, store attachments, commit.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dat_blobs::{BlobError, BlobStore};
use dat_store::{Committed, Conflict, DocumentStore, DocumentWrite, StoreError};
use dat_types::{Attachment, AttachmentSpec, Draft, Fields};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Format, IngestConfig};
use crate::error::{IngestError, IngestResult};
use crate::key::KeyResolver;
use crate::normalize::{normalizer_for, RowNormalizer};

/// Size of each read from the input.
const CHUNK_SIZE: usize = 8 * 1024;

/// Progress is logged every this many items.
const PROGRESS_EVERY: u64 = 10_000;

/// Events buffered between a spawned stream and its handle.
const EVENT_BUFFER: usize = 64;

/// Outcome counts of a finished stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub committed: u64,
    pub conflicts: u64,
    pub skipped: u64,
}

/// One observable outcome of an ingestion stream.
///
/// Item events carry the zero-based position of the item in the input.
#[derive(Debug)]
pub enum IngestEvent {
    /// The item was committed.
    Committed { index: u64, key: String, version: u64 },
    /// The item lost an optimistic-concurrency check; the stream continues.
    Conflict { index: u64, conflict: Box<Conflict> },
    /// The item could not be committed; the stream continues.
    Skipped { index: u64, error: IngestError },
    /// The stream stopped. Earlier commits stand; no `Completed` follows.
    Fatal(IngestError),
    /// Input exhausted and every item resolved.
    Completed(IngestSummary),
}

impl IngestEvent {
    /// Whether this is the last event of its stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Completed(_))
    }

    /// The committed `(key, version)`, if this is a success.
    pub fn committed(&self) -> Option<(&str, u64)> {
        match self {
            Self::Committed { key, version, .. } => Some((key, *version)),
            _ => None,
        }
    }
}

type Drafts<'a> = Box<dyn Iterator<Item = IngestResult<Draft>> + Send + 'a>;

/// Reads chunks on demand and feeds them through a normalizer.
///
/// Records completed before a fatal error are yielded first, then the error,
/// then nothing.
struct ReaderDrafts<R> {
    reader: R,
    normalizer: Box<dyn RowNormalizer>,
    store: Arc<dyn DocumentStore>,
    chunk: Box<[u8]>,
    pending: VecDeque<Fields>,
    error: Option<IngestError>,
    columns_checked: bool,
    eof: bool,
}

impl<R: Read> ReaderDrafts<R> {
    fn new(reader: R, normalizer: Box<dyn RowNormalizer>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            reader,
            normalizer,
            store,
            chunk: vec![0; CHUNK_SIZE].into_boxed_slice(),
            pending: VecDeque::new(),
            error: None,
            columns_checked: false,
            eof: false,
        }
    }

    fn fill(&mut self) {
        let mut out = Vec::new();
        let result = match self.reader.read(&mut self.chunk) {
            Ok(0) => {
                self.eof = true;
                self.normalizer.finish(&mut out)
            }
            Ok(n) => self.normalizer.push(&self.chunk[..n], &mut out),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            self.eof = true;
            self.error = Some(e);
        }

        if !self.columns_checked {
            if let Some(columns) = self.normalizer.columns() {
                self.columns_checked = true;
                if let Err(e) = self.store.ensure_columns(columns) {
                    out.clear();
                    self.eof = true;
                    self.error = Some(match e {
                        StoreError::ColumnMismatch { expected, actual } => {
                            IngestError::ColumnMismatch {
                                record: 1,
                                expected,
                                found: actual,
                            }
                        }
                        other => other.into(),
                    });
                }
            }
        }

        self.pending.extend(out);
    }
}

impl<R: Read> Iterator for ReaderDrafts<R> {
    type Item = IngestResult<Draft>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(fields) = self.pending.pop_front() {
                return Some(Draft::from_fields(fields).map_err(IngestError::from));
            }
            if let Some(e) = self.error.take() {
                return Some(Err(e));
            }
            if self.eof {
                return None;
            }
            self.fill();
        }
    }
}

/// Lazy sequence of [`IngestEvent`]s for one input stream.
///
/// Nothing is read or committed until the stream is advanced. Each call to
/// `next` resolves exactly one item, so commits happen strictly in input
/// order. The stream ends after `Completed` or `Fatal`.
pub struct IngestStream<'a> {
    ingestor: Ingestor,
    drafts: Drafts<'a>,
    resolver: KeyResolver,
    attachment_root: Option<PathBuf>,
    format: Format,
    quiet: bool,
    index: u64,
    summary: IngestSummary,
    done: bool,
}

impl<'a> IngestStream<'a> {
    fn new(ingestor: Ingestor, drafts: Drafts<'a>, config: &IngestConfig) -> Self {
        if !config.quiet {
            info!(format = %config.format, "ingest started");
        }
        Self {
            ingestor,
            drafts,
            resolver: KeyResolver::new(config),
            attachment_root: config.attachment_root.clone(),
            format: config.format,
            quiet: config.quiet,
            index: 0,
            summary: IngestSummary::default(),
            done: false,
        }
    }

    /// Drive the stream to its end, returning the summary or the fatal error.
    pub fn run(self) -> IngestResult<IngestSummary> {
        for event in self {
            match event {
                IngestEvent::Fatal(e) => return Err(e),
                IngestEvent::Completed(summary) => return Ok(summary),
                _ => {}
            }
        }
        Ok(IngestSummary::default())
    }

    fn process(&self, draft: Draft) -> IngestResult<Committed> {
        let key = self.resolver.resolve(&draft)?;
        let attachments = self.store_attachments(draft.attachments)?;
        let write = DocumentWrite::new(key, draft.fields)
            .with_attachments(attachments)
            .expecting(draft.version);
        Ok(self.ingestor.store.commit(write)?)
    }

    fn store_attachments(
        &self,
        specs: BTreeMap<String, AttachmentSpec>,
    ) -> IngestResult<BTreeMap<String, Attachment>> {
        let mut attachments = BTreeMap::new();
        for (name, spec) in specs {
            let attachment = match spec {
                AttachmentSpec::Stored(attachment) => {
                    if !self.ingestor.blobs.contains(&attachment.hash)? {
                        return Err(BlobError::NotFound(attachment.hash).into());
                    }
                    attachment
                }
                AttachmentSpec::File { path } => {
                    let path = match &self.attachment_root {
                        Some(root) if path.is_relative() => root.join(path),
                        _ => path,
                    };
                    let mut file = File::open(&path).map_err(|source| IngestError::Attachment {
                        name: name.clone(),
                        source,
                    })?;
                    let attachment = self.ingestor.blobs.write_from(&name, &mut file)?;
                    debug!(%name, path = %path.display(), hash = %attachment.hash, size = attachment.size, "attachment stored");
                    attachment
                }
            };
            attachments.insert(name, attachment);
        }
        Ok(attachments)
    }

    fn complete(&mut self) -> IngestEvent {
        self.done = true;
        let IngestSummary {
            committed,
            conflicts,
            skipped,
        } = self.summary;
        if !self.quiet {
            info!(format = %self.format, committed, conflicts, skipped, "ingest completed");
        }
        IngestEvent::Completed(self.summary)
    }
}

impl Iterator for IngestStream<'_> {
    type Item = IngestEvent;

    fn next(&mut self) -> Option<IngestEvent> {
        if self.done {
            return None;
        }
        let Some(item) = self.drafts.next() else {
            return Some(self.complete());
        };

        let index = self.index;
        self.index += 1;

        let event = match item.and_then(|draft| self.process(draft)) {
            Ok(Committed { key, version }) => {
                self.summary.committed += 1;
                debug!(index, %key, version, "item committed");
                IngestEvent::Committed { index, key, version }
            }
            Err(IngestError::Store(StoreError::Conflict(conflict))) => {
                self.summary.conflicts += 1;
                debug!(index, key = %conflict.key(), current = conflict.current_version(), "item conflicted");
                IngestEvent::Conflict { index, conflict }
            }
            Err(error) if error.is_fatal() => {
                self.done = true;
                warn!(index, kind = error.kind(), %error, "ingest aborted");
                IngestEvent::Fatal(error)
            }
            Err(error) => {
                self.summary.skipped += 1;
                debug!(index, kind = error.kind(), %error, "item skipped");
                IngestEvent::Skipped { index, error }
            }
        };

        if !self.quiet && self.index % PROGRESS_EVERY == 0 {
            info!(items = self.index, committed = self.summary.committed, "ingest progress");
        }
        Some(event)
    }
}

impl std::fmt::Debug for IngestStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestStream")
            .field("format", &self.format)
            .field("index", &self.index)
            .field("summary", &self.summary)
            .field("done", &self.done)
            .finish()
    }
}

/// Handle to a stream running on the blocking thread pool.
///
/// Dropping the handle, or calling [`IngestHandle::abort`], stops the
/// stream before its next item. Items already committed stay committed.
#[derive(Debug)]
pub struct IngestHandle {
    events: mpsc::Receiver<IngestEvent>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl IngestHandle {
    /// Next event, or `None` once the stream has ended or was aborted.
    pub async fn next(&mut self) -> Option<IngestEvent> {
        self.events.recv().await
    }

    /// Stop the stream before its next item.
    pub fn abort(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Gather every remaining event.
    pub async fn collect(mut self) -> Vec<IngestEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Entry point for ingestion against a pair of shared stores.
///
/// Cheap to clone; every stream started from it commits to the same
/// document store and writes attachments to the same blob store.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Ingest raw input in the configured format.
    ///
    /// An unusable configuration surfaces as the stream's first (and only)
    /// event, `Fatal`.
    pub fn ingest<'a, R>(&self, reader: R, config: &IngestConfig) -> IngestStream<'a>
    where
        R: Read + Send + 'a,
    {
        let drafts: Drafts<'a> = match normalizer_for(config) {
            Ok(normalizer) => Box::new(ReaderDrafts::new(reader, normalizer, Arc::clone(&self.store))),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        IngestStream::new(self.clone(), drafts, config)
    }

    /// Ingest already-parsed JSON values, one document each.
    ///
    /// Values that are not objects are skipped.
    pub fn ingest_values<'a, I>(&self, values: I, config: &IngestConfig) -> IngestStream<'a>
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'a,
    {
        let drafts = values
            .into_iter()
            .map(|value| Draft::from_value(value).map_err(IngestError::from));
        IngestStream::new(self.clone(), Box::new(drafts), config)
    }

    /// Run a stream on the tokio blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R>(&self, reader: R, config: &IngestConfig) -> IngestHandle
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut stream = self.ingest(reader, config);
        let cancelled = Arc::clone(&cancel);

        let task = tokio::task::spawn_blocking(move || {
            while !cancelled.load(Ordering::Relaxed) {
                let Some(event) = stream.next() else { break };
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            if cancelled.load(Ordering::Relaxed) {
                debug!(items = stream.index, "ingest cancelled");
            }
        });

        IngestHandle {
            events: rx,
            cancel,
            task,
        }
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("documents", &self.store.count())
            .finish_non_exhaustive()
    }
}
