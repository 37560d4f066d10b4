use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dat_types::Document;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{StoreError, StoreResult};

/// A single journaled state change.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-encoded JournalRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    /// A committed document version.
    Commit { document: Document },
    /// The column set established by the first tabular stream.
    Columns { columns: Vec<String> },
}

/// Flush/sync strategy for the journal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every record (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for the [`Journal`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JournalConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// The append-only file under a journal. Writes always land at the end.
pub(crate) trait JournalFile: Write + Send {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl JournalFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

struct JournalWriter {
    file: Box<dyn JournalFile>,
    offset: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

impl JournalWriter {
    fn write_frame(&mut self, frame: &[u8], sync_mode: &SyncMode) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        if *sync_mode == SyncMode::EveryWrite {
            self.file.sync()?;
        }
        Ok(())
    }
}

/// Append-only commit journal.
///
/// Records are framed with a length prefix and a CRC32 checksum, and each
/// append is all-or-nothing: a frame that fails part way is cut back off
/// the file before the error is returned. On open, a torn trailing record
/// (left by a crash mid-append) is truncated away so that later appends
/// start on a record boundary. Damaged bytes in the middle of the file are
/// skipped up to the next intact record.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    config: JournalConfig,
}

impl Journal {
    /// Open (or create) the journal file at `path`.
    pub fn open(path: &Path, config: JournalConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let (_, valid_len) = scan(path)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
        }

        Ok(Self::with_file(path, Box::new(file), valid_len, config))
    }

    /// Wrap an already positioned journal file whose first `offset` bytes
    /// are whole records.
    pub(crate) fn with_file(
        path: &Path,
        file: Box<dyn JournalFile>,
        offset: u64,
        config: JournalConfig,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter {
                file,
                offset,
                broken: false,
            }),
            config,
        }
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and flush it. Returns the record's byte offset.
    ///
    /// On error the file is left exactly as it was before the call.
    pub fn append(&self, record: &JournalRecord) -> StoreResult<u64> {
        let frame = encode_frame(record)?;

        let mut w = self.writer.lock().expect("journal mutex poisoned");
        if w.broken {
            return Err(StoreError::Storage(io::Error::other(
                "journal holds a partial record; reopen the store",
            )));
        }
        let record_offset = w.offset;

        if let Err(e) = w.write_frame(&frame, &self.config.sync_mode) {
            warn!(offset = record_offset, error = %e, "journal append failed; rolling back");
            if let Err(rollback) = w.file.truncate(record_offset) {
                error!(
                    offset = record_offset,
                    error = %rollback,
                    "journal rollback failed; refusing further appends"
                );
                w.broken = true;
            }
            return Err(e.into());
        }

        w.offset += frame.len() as u64;

        debug!(offset = record_offset, len = frame.len(), "journal append");
        Ok(record_offset)
    }

    /// Read back every intact record in append order.
    pub fn recover(&self) -> StoreResult<Vec<JournalRecord>> {
        let (records, _) = scan(&self.path)?;
        debug!(recovered = records.len(), "journal recovery complete");
        Ok(records)
    }
}

/// Encode `record` as one complete frame.
fn encode_frame(record: &JournalRecord) -> StoreResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len()).map_err(|_| {
        StoreError::Serialization(format!("record of {} bytes is too large", payload.len()))
    })?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Payload of the frame at `offset`, if the whole frame is present and its
/// CRC matches.
fn intact_frame(bytes: &[u8], offset: usize) -> Option<&[u8]> {
    let header = bytes.get(offset..offset.checked_add(HEADER_SIZE)?)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if length == 0 {
        return None;
    }
    let start = offset + HEADER_SIZE;
    let payload = bytes.get(start..start.checked_add(length)?)?;
    (crc32fast::hash(payload) == crc).then_some(payload)
}

/// Read all intact records and the length up to the end of the last one.
///
/// Bytes that do not form an intact frame are skipped when an intact frame
/// follows them; otherwise they are the torn tail and excluded from the
/// returned length.
fn scan(path: &Path) -> StoreResult<(Vec<JournalRecord>, u64)> {
    let bytes = fs::read(path)?;
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut valid_len = 0usize;

    while offset < bytes.len() {
        let Some(payload) = intact_frame(&bytes, offset) else {
            match (offset + 1..bytes.len()).find(|&next| intact_frame(&bytes, next).is_some()) {
                Some(next) => {
                    warn!(
                        offset,
                        skipped = next - offset,
                        "damaged journal bytes; resuming at next intact record"
                    );
                    offset = next;
                    continue;
                }
                None => break,
            }
        };

        match serde_json::from_slice::<JournalRecord>(payload) {
            Ok(record) => records.push(record),
            Err(e) => warn!(offset, error = %e, "undecodable journal record; skipping"),
        }
        offset += HEADER_SIZE + payload.len();
        valid_len = offset;
    }

    Ok((records, valid_len as u64))
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, version: u64) -> Document {
        Document {
            key: key.into(),
            version,
            fields: json!({"n": version}).as_object().cloned().unwrap(),
            attachments: Default::default(),
        }
    }

    fn commit(key: &str) -> JournalRecord {
        JournalRecord::Commit {
            document: doc(key, 1),
        }
    }

    fn keys(records: Vec<JournalRecord>) -> Vec<String> {
        records
            .into_iter()
            .map(|r| match r {
                JournalRecord::Commit { document } => document.key,
                JournalRecord::Columns { .. } => panic!("unexpected columns record"),
            })
            .collect()
    }

    #[test]
    fn append_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("journal"), JournalConfig::default()).unwrap();

        let first = commit("a");
        let second = JournalRecord::Columns {
            columns: vec!["x".into(), "y".into()],
        };
        assert_eq!(journal.append(&first).unwrap(), 0);
        assert!(journal.append(&second).unwrap() > 0);

        assert_eq!(journal.recover().unwrap(), vec![first, second]);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        {
            let journal = Journal::open(&path, JournalConfig::default()).unwrap();
            journal.append(&commit("a")).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();

        // Simulate a crash halfway through the next append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&encode_frame(&commit("lost")).unwrap()[..HEADER_SIZE + 5])
            .unwrap();
        drop(file);

        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        journal.append(&commit("b")).unwrap();
        assert_eq!(keys(journal.recover().unwrap()), ["a", "b"]);
    }

    #[test]
    fn corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        journal.append(&commit("a")).unwrap();
        let second = journal.append(&commit("b")).unwrap();
        drop(journal);

        // Flip a payload byte of the first record.
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        assert_eq!(keys(journal.recover().unwrap()), ["b"]);
        assert!(second > 0);
    }

    #[test]
    fn partial_frame_mid_file_does_not_hide_later_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");

        let mut bytes = encode_frame(&commit("a")).unwrap();
        bytes.extend_from_slice(&encode_frame(&commit("lost")).unwrap()[..HEADER_SIZE + 5]);
        bytes.extend_from_slice(&encode_frame(&commit("b")).unwrap());
        bytes.extend_from_slice(&encode_frame(&commit("c")).unwrap());
        fs::write(&path, &bytes).unwrap();

        let journal = Journal::open(&path, JournalConfig::default()).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), bytes.len() as u64);
        assert_eq!(keys(journal.recover().unwrap()), ["a", "b", "c"]);
    }

    #[test]
    fn failed_append_leaves_no_partial_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let (journal, faults) = faults::open(&path);
        journal.append(&commit("a")).unwrap();
        let intact_len = fs::metadata(&path).unwrap().len();

        faults.fail_writes_after(HEADER_SIZE + 5);
        let err = journal.append(&commit("lost")).unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)), "{err}");
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        faults.heal();
        assert_eq!(journal.append(&commit("b")).unwrap(), intact_len);
        journal.append(&commit("c")).unwrap();
        drop(journal);

        let reopened = Journal::open(&path, JournalConfig::default()).unwrap();
        assert_eq!(keys(reopened.recover().unwrap()), ["a", "b", "c"]);
    }

    #[test]
    fn failed_rollback_refuses_further_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let (journal, faults) = faults::open(&path);
        journal.append(&commit("a")).unwrap();

        faults.fail_writes_after(3);
        faults.fail_truncate();
        assert!(journal.append(&commit("lost")).is_err());

        faults.heal();
        assert!(matches!(journal.append(&commit("b")), Err(StoreError::Storage(_))));
        drop(journal);

        // Reopening trims the partial frame and accepts appends again.
        let reopened = Journal::open(&path, JournalConfig::default()).unwrap();
        reopened.append(&commit("b")).unwrap();
        assert_eq!(keys(reopened.recover().unwrap()), ["a", "b"]);
    }

    #[test]
    fn sync_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let config = JournalConfig {
            sync_mode: SyncMode::EveryWrite,
        };
        let journal = Journal::open(&dir.path().join("nested/journal"), config).unwrap();
        journal.append(&commit("a")).unwrap();
        assert_eq!(journal.recover().unwrap().len(), 1);
    }
}
