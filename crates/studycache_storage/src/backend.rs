//! Persistent store capability.

use crate::error::StorageResult;
use crate::record::{Record, WriteBatch};

/// Result of compacting a durable store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Bytes on disk before compaction.
    pub bytes_before: u64,
    /// Bytes on disk after compaction.
    pub bytes_after: u64,
    /// Live rows written to the compacted log.
    pub live_rows: usize,
}

/// A keyed record store with secondary indexes and atomic batches.
///
/// Stores are **opaque**: they file records by key and by the index entries
/// carried on each [`Record`], and never interpret record values. Everything
/// above this trait (cache, action queue, sync status) owns its own tables and
/// encodes its own rows.
///
/// # Invariants
///
/// - `commit` applies every operation of a batch or none of them
/// - Readers observe the state before or after a batch, never in between
/// - `query` returns records ordered by key
/// - On a durable store, a batch survives process termination once `commit`
///   returns
///
/// # Implementors
///
/// - [`super::MemoryStore`] - ephemeral
/// - [`super::FileStore`] - durable
pub trait PersistentStore: Send + Sync {
    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Record>>;

    /// Returns every record in `table`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn scan(&self, table: &str) -> StorageResult<Vec<Record>>;

    /// Returns the records of `table` filed under `index = value`, ordered by
    /// key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn query(&self, table: &str, index: &str, value: &str) -> StorageResult<Vec<Record>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be made durable. In that case no
    /// operation of the batch is visible.
    fn commit(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Returns the number of records in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn len(&self, table: &str) -> StorageResult<usize> {
        Ok(self.scan(table)?.len())
    }

    /// Returns the names of all non-empty tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn tables(&self) -> StorageResult<Vec<String>>;

    /// Returns true if committed batches survive a process restart.
    fn is_durable(&self) -> bool;

    /// Reclaims space held by superseded data. A no-op for stores that have
    /// nothing to reclaim.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted state cannot be written.
    fn compact(&self) -> StorageResult<CompactionStats> {
        Ok(CompactionStats::default())
    }

    /// Inserts or replaces a single record.
    ///
    /// # Errors
    ///
    /// See [`PersistentStore::commit`].
    fn put(&self, table: &str, record: Record) -> StorageResult<()> {
        self.commit(WriteBatch::new().put(table, record))
    }

    /// Deletes a single record. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// See [`PersistentStore::commit`].
    fn delete(&self, table: &str, key: &str) -> StorageResult<()> {
        self.commit(WriteBatch::new().delete(table, key))
    }
}
