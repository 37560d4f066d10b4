use std::path::Path;

use dat_ingest::IngestConfig;
use dat_store::{JournalConfig, SyncMode};
use serde::{Deserialize, Serialize};

use crate::error::{DatError, DatResult};

/// Name of the optional configuration file inside a data directory.
pub const CONFIG_FILE: &str = "dat.toml";

/// Settings of an on-disk [`Dat`](crate::Dat).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DatConfig {
    /// Journal file, relative to the data directory.
    pub journal_file: String,
    /// Blob directory, relative to the data directory.
    pub blob_dir: String,
    /// `fsync` every journal record and every blob.
    pub sync_writes: bool,
    /// Default options for ingestion streams.
    pub ingest: IngestConfig,
}

impl Default for DatConfig {
    fn default() -> Self {
        Self {
            journal_file: "journal.log".into(),
            blob_dir: "blobs".into(),
            sync_writes: false,
            ingest: IngestConfig::default(),
        }
    }
}

impl DatConfig {
    pub fn from_toml_str(s: &str) -> DatResult<Self> {
        toml::from_str(s).map_err(|e| DatError::Config(e.to_string()))
    }

    /// Read `dat.toml` from `dir`, falling back to defaults when absent.
    pub fn load_from_dir(dir: &Path) -> DatResult<Self> {
        let path = dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn journal(&self) -> JournalConfig {
        JournalConfig {
            sync_mode: if self.sync_writes {
                SyncMode::EveryWrite
            } else {
                SyncMode::OsDefault
            },
        }
    }
}
