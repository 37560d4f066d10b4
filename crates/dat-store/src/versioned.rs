use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use dat_types::Document;
use tracing::{debug, info, warn};

use crate::error::{Conflict, StoreError, StoreResult};
use crate::journal::{Journal, JournalConfig, JournalRecord};
use crate::traits::{DocumentStore, Scan};
use crate::types::{Committed, DocumentWrite};

/// All versions of one key plus its position in scan order.
struct Entry {
    seq: u64,
    versions: Vec<Arc<Document>>,
}

impl Entry {
    fn latest(&self) -> &Arc<Document> {
        // Entries are only created together with their first version.
        &self.versions[self.versions.len() - 1]
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Scan order: sequence number of the last commit -> key.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    columns: Option<Vec<String>>,
}

impl State {
    /// Install a new latest version, moving the key to the end of scan order.
    fn install(&mut self, document: Document) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = document.key.clone();
        let document = Arc::new(document);

        match self.entries.get_mut(&key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                entry.seq = seq;
                entry.versions.push(document);
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        seq,
                        versions: vec![document],
                    },
                );
            }
        }
        self.order.insert(seq, key);
    }

    fn entry(&self, key: &str) -> StoreResult<&Entry> {
        self.entries.get(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }
}

/// Versioned document store with optimistic concurrency.
///
/// State lives in memory behind a single `RwLock`; every commit runs its
/// version check, journal append and state update under the write guard,
/// so each commit is atomic and all-or-nothing. Readers take consistent
/// snapshots under the read guard.
///
/// With a [`Journal`] attached, every state change is appended before it is
/// applied, and [`VersionedStore::open`] rebuilds the state on startup.
pub struct VersionedStore {
    state: RwLock<State>,
    journal: Option<Journal>,
}

impl VersionedStore {
    /// Create an empty, purely in-memory store.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(State::default()),
            journal: None,
        }
    }

    /// Open a journal-backed store, replaying any existing journal.
    pub fn open(path: &Path, config: JournalConfig) -> StoreResult<Self> {
        Self::from_journal(Journal::open(path, config)?)
    }

    /// Build a store from the records of an opened journal. Later commits
    /// are appended to it.
    pub fn from_journal(journal: Journal) -> StoreResult<Self> {
        let mut state = State::default();
        let mut replayed = 0usize;

        for record in journal.recover()? {
            match record {
                JournalRecord::Commit { document } => {
                    let expected = state
                        .entries
                        .get(&document.key)
                        .map_or(1, |e| e.latest().version + 1);
                    if document.version != expected {
                        warn!(
                            key = %document.key,
                            version = document.version,
                            expected,
                            "out-of-sequence journal record; skipping"
                        );
                        continue;
                    }
                    state.install(document);
                    replayed += 1;
                }
                JournalRecord::Columns { columns } => state.columns = Some(columns),
            }
        }

        info!(
            path = %journal.path().display(),
            documents = state.entries.len(),
            replayed,
            "document store opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            journal: Some(journal),
        })
    }

    fn append(&self, record: &JournalRecord) -> StoreResult<()> {
        if let Some(journal) = &self.journal {
            journal.append(record)?;
        }
        Ok(())
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl DocumentStore for VersionedStore {
    fn commit(&self, write: DocumentWrite) -> StoreResult<Committed> {
        let mut state = self.state.write().expect("lock poisoned");

        let version = match state.entries.get(&write.key) {
            None => 1,
            Some(entry) => {
                let current = entry.latest();
                if write.expected_version != Some(current.version) {
                    debug!(
                        key = %write.key,
                        stored = current.version,
                        expected = ?write.expected_version,
                        "commit conflict"
                    );
                    return Err(StoreError::Conflict(Box::new(Conflict {
                        current: Arc::clone(current),
                        attempted: write,
                    })));
                }
                current.version + 1
            }
        };

        let document = Document {
            key: write.key,
            version,
            fields: write.fields,
            attachments: write.attachments,
        };

        self.append(&JournalRecord::Commit {
            document: document.clone(),
        })?;

        let committed = Committed {
            key: document.key.clone(),
            version,
        };
        state.install(document);

        debug!(key = %committed.key, version, "document committed");
        Ok(committed)
    }

    fn get(&self, key: &str) -> StoreResult<Arc<Document>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(Arc::clone(state.entry(key)?.latest()))
    }

    fn get_version(&self, key: &str, version: u64) -> StoreResult<Arc<Document>> {
        let state = self.state.read().expect("lock poisoned");
        let entry = state.entry(key)?;
        version
            .checked_sub(1)
            .and_then(|idx| entry.versions.get(idx as usize))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: format!("{key}@{version}"),
            })
    }

    fn history(&self, key: &str) -> StoreResult<Vec<Arc<Document>>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.entry(key)?.versions.clone())
    }

    fn scan(&self) -> StoreResult<Scan> {
        let state = self.state.read().expect("lock poisoned");
        let snapshot: Vec<_> = state
            .order
            .values()
            .map(|key| Arc::clone(state.entries[key].latest()))
            .collect();
        Ok(snapshot.into_iter())
    }

    fn count(&self) -> usize {
        self.state.read().expect("lock poisoned").entries.len()
    }

    fn ensure_columns(&self, columns: &[String]) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(expected) = &state.columns {
            if expected.as_slice() == columns {
                return Ok(());
            }
            return Err(StoreError::ColumnMismatch {
                expected: expected.clone(),
                actual: columns.to_vec(),
            });
        }

        let columns = columns.to_vec();
        self.append(&JournalRecord::Columns {
            columns: columns.clone(),
        })?;
        debug!(?columns, "column set established");
        state.columns = Some(columns);
        Ok(())
    }

    fn columns(&self) -> Option<Vec<String>> {
        self.state.read().expect("lock poisoned").columns.clone()
    }
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("documents", &self.count())
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}
