use std::sync::Arc;

use dat_types::{Document, Fields};

use crate::error::StoreResult;
use crate::types::{Committed, DocumentWrite};

/// Snapshot iterator over documents in insertion/update order.
pub type Scan = std::vec::IntoIter<Arc<Document>>;

/// Snapshot iterator over bare field mappings.
pub type ValueScan = std::iter::Map<Scan, fn(Arc<Document>) -> Fields>;

/// Storage interface for versioned documents.
///
/// Implementations must make the read-compare-write of a single key's
/// version one atomic step: two commits racing from the same expected
/// version yield exactly one success and one conflict.
pub trait DocumentStore: Send + Sync {
    /// Commit a new version of a document.
    ///
    /// - Absent key: creates version 1; any expected version is ignored.
    /// - Present key: succeeds only if `expected_version` equals the stored
    ///   version, producing `stored + 1`.
    /// - Otherwise returns [`StoreError::Conflict`](crate::StoreError::Conflict)
    ///   and leaves the store untouched.
    fn commit(&self, write: DocumentWrite) -> StoreResult<Committed>;

    /// Latest version of a document.
    fn get(&self, key: &str) -> StoreResult<Arc<Document>>;

    /// A specific committed version of a document.
    fn get_version(&self, key: &str, version: u64) -> StoreResult<Arc<Document>>;

    /// Every committed version of a document, oldest first.
    fn history(&self, key: &str) -> StoreResult<Vec<Arc<Document>>>;

    /// Latest versions of all documents in insertion/update order.
    fn scan(&self) -> StoreResult<Scan>;

    /// Field mappings of all documents, in the same order as [`scan`](Self::scan).
    fn scan_values(&self) -> StoreResult<ValueScan> {
        fn fields_of(doc: Arc<Document>) -> Fields {
            doc.fields.clone()
        }
        Ok(self.scan()?.map(fields_of as fn(Arc<Document>) -> Fields))
    }

    /// Number of distinct live keys.
    fn count(&self) -> usize;

    /// Establish the store's column set, or check `columns` against it.
    fn ensure_columns(&self, columns: &[String]) -> StoreResult<()>;

    /// The established column set, if any tabular stream has set one.
    fn columns(&self) -> Option<Vec<String>>;
}
