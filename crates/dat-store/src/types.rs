use std::collections::BTreeMap;

use dat_types::{Attachment, Fields};
use serde::{Deserialize, Serialize};

/// A pending write of one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentWrite {
    pub key: String,
    pub fields: Fields,
    /// Attachments of the new version. Nothing is carried over implicitly
    /// from the previous version.
    pub attachments: BTreeMap<String, Attachment>,
    /// Version the writer read. `None` is a blind write, which only succeeds
    /// when the key does not exist yet.
    pub expected_version: Option<u64>,
}

impl DocumentWrite {
    pub fn new(key: impl Into<String>, fields: Fields) -> Self {
        Self {
            key: key.into(),
            fields,
            attachments: BTreeMap::new(),
            expected_version: None,
        }
    }

    pub fn expecting(mut self, version: impl Into<Option<u64>>) -> Self {
        self.expected_version = version.into();
        self
    }

    pub fn with_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.attachments.insert(name.into(), attachment);
        self
    }

    pub fn with_attachments(mut self, attachments: BTreeMap<String, Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Outcome of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committed {
    pub key: String,
    pub version: u64,
}
