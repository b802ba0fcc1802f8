//! In-memory store.

use crate::backend::PersistentStore;
use crate::error::StorageResult;
use crate::record::{Record, WriteBatch};
use crate::tables::Tables;
use parking_lot::RwLock;

/// An in-memory store.
///
/// Suitable for:
/// - Unit and integration tests
/// - Platforms without writable local storage, where offline data simply
///   does not outlive the process
///
/// # Thread Safety
///
/// Batches are applied under a single write lock, so concurrent readers see
/// either the old or the new state.
///
/// # Example
///
/// ```rust
/// use studycache_storage::{MemoryStore, PersistentStore, Record};
///
/// let store = MemoryStore::new();
/// store.put("t", Record::new("k", b"v".to_vec())).unwrap();
/// assert_eq!(store.len("t").unwrap(), 1);
/// assert!(!store.is_durable());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows across all tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.read().row_count()
    }

    /// Removes every row.
    pub fn clear(&self) {
        *self.tables.write() = Tables::new();
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Record>> {
        Ok(self.tables.read().get(table, key))
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<Record>> {
        Ok(self.tables.read().scan(table))
    }

    fn query(&self, table: &str, index: &str, value: &str) -> StorageResult<Vec<Record>> {
        Ok(self.tables.read().query(table, index, value))
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tables.write().apply(batch.ops());
        Ok(())
    }

    fn len(&self, table: &str) -> StorageResult<usize> {
        Ok(self.tables.read().len(table))
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.tables.read().names())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
