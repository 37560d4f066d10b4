use std::sync::Arc;

use dat_types::{Attachment, Document};

/// The document an attachment write lands on.
///
/// Without a key a fresh document with a generated key is created. With a
/// key the document is created when absent; an existing document is only
/// updated if `version` names its current version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentTarget {
    pub key: Option<String>,
    pub version: Option<u64>,
}

impl AttachmentTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            version: None,
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Target the next version of `document`.
    pub fn of(document: &Document) -> Self {
        Self::key(document.key.clone()).at_version(document.version)
    }
}

/// Result of a completed attachment write.
#[derive(Clone, Debug)]
pub struct AttachmentWrite {
    pub name: String,
    pub attachment: Attachment,
    /// The owning document as committed, attachment included.
    pub document: Arc<Document>,
}
