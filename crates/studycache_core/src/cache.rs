//! Expiry- and capacity-bounded artifact cache.
//!
//! Two independent eviction policies:
//!
//! - **Expiry**: rows past `expires_at` are never served and are removed by
//!   [`CacheStore::evict_expired`] or lazily on read
//! - **Capacity**: per owner and artifact type, the least recently accessed
//!   rows are removed once the count exceeds the limit, whether or not they
//!   have expired

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{ArtifactType, CachedArtifact, NewArtifact};
use crate::rows::{self, ARTIFACT_TABLE, OWNER_INDEX, OWNER_TYPE_INDEX};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use studycache_storage::{PersistentStore, Record, WriteBatch};
use tracing::{debug, warn};

/// Row counts reported by [`CacheStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Rows per artifact type.
    pub per_type: BTreeMap<ArtifactType, usize>,
    /// Rows per owner.
    pub per_owner: BTreeMap<String, usize>,
    /// Rows already past their expiry.
    pub expired: usize,
    /// Rows whose nested resources are not all local.
    pub not_materialized: usize,
    /// Total rows.
    pub total: usize,
}

/// Bounded, expiry-aware storage of [`CachedArtifact`] rows.
///
/// The cache exclusively owns the artifact table. All writes are serialized
/// through one lock; each write is a single store batch, so concurrent readers
/// see either the old or the new row.
pub struct CacheStore {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    write_lock: Mutex<()>,
}

impl CacheStore {
    /// Creates a cache over `store`.
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Inserts or replaces an artifact.
    ///
    /// `cached_at` is kept for existing rows, `last_accessed_at` is kept for
    /// existing rows and set to now for new ones, and `expires_at` is always
    /// reset from the TTL policy. When capacity enforcement on put is enabled
    /// the owner/type bucket is trimmed afterwards, never evicting the row
    /// just written.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be encoded or written.
    pub fn put(&self, artifact: NewArtifact) -> CoreResult<CachedArtifact> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        let key = rows::artifact_key(
            &artifact.owner_id,
            artifact.artifact_type,
            &artifact.artifact_id,
        );

        let existing = self.load(&key);
        let (cached_at, last_accessed_at) = match &existing {
            Some(old) => (old.cached_at, old.last_accessed_at),
            None => (now, now),
        };
        let ttl = self.config.ttl.ttl_for(artifact.artifact_type);

        let row = CachedArtifact {
            artifact_type: artifact.artifact_type,
            artifact_id: artifact.artifact_id,
            owner_id: artifact.owner_id,
            payload: artifact.payload,
            cached_at,
            // Never earlier than cached_at, even if the clock went backwards
            expires_at: now.saturating_add(ttl).max(cached_at),
            last_accessed_at,
            is_fully_materialized: artifact.is_fully_materialized,
        };
        self.store.put(ARTIFACT_TABLE, to_record(&key, &row)?)?;

        if self.config.enforce_capacity_on_put {
            let limit = self.config.capacity.limit_for(row.artifact_type);
            self.trim_locked(&row.owner_id, row.artifact_type, limit, Some(&row.artifact_id))?;
        }
        Ok(row)
    }

    /// Reads an artifact.
    ///
    /// Returns `None` on a miss, on an expired row (which is removed), and on
    /// an unreadable row (which is removed and logged). A hit refreshes
    /// `last_accessed_at`. Never fails: storage faults are logged and
    /// reported as a miss so callers can fall back to a placeholder.
    pub fn get(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> Option<CachedArtifact> {
        let key = rows::artifact_key(owner_id, artifact_type, artifact_id);
        let _guard = self.write_lock.lock();
        let now = self.clock.now();

        let mut row = self.load(&key)?;
        if row.is_expired(now) {
            debug!(owner_id, %artifact_type, artifact_id, "expired on read");
            if let Err(e) = self.store.delete(ARTIFACT_TABLE, &key) {
                warn!(owner_id, %artifact_type, artifact_id, error = %e, "failed to drop expired row");
            }
            return None;
        }

        if row.last_accessed_at != now {
            row.last_accessed_at = now;
            let written = to_record(&key, &row)
                .and_then(|record| {
                    self.store
                        .put(ARTIFACT_TABLE, record)
                        .map_err(CoreError::from)
                });
            if let Err(e) = written {
                // The read still succeeds; only the LRU bookkeeping is lost
                warn!(owner_id, %artifact_type, artifact_id, error = %e, "failed to record access");
            }
        }
        Some(row)
    }

    /// Returns the artifacts of an owner and type without touching access
    /// times. Expired rows are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self, owner_id: &str, artifact_type: ArtifactType) -> CoreResult<Vec<CachedArtifact>> {
        self.bucket(owner_id, artifact_type)
    }

    /// Returns the number of rows for an owner and type.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn count(&self, owner_id: &str, artifact_type: ArtifactType) -> CoreResult<usize> {
        Ok(self
            .store
            .query(
                ARTIFACT_TABLE,
                OWNER_TYPE_INDEX,
                &rows::owner_type_value(owner_id, artifact_type),
            )?
            .len())
    }

    /// Removes one artifact. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be deleted.
    pub fn remove(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> CoreResult<bool> {
        let _guard = self.write_lock.lock();
        let key = rows::artifact_key(owner_id, artifact_type, artifact_id);
        if self.store.get(ARTIFACT_TABLE, &key)?.is_none() {
            return Ok(false);
        }
        self.store.delete(ARTIFACT_TABLE, &key)?;
        Ok(true)
    }

    /// Records that every nested resource of an artifact is now local.
    /// Returns false if the artifact is not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn mark_materialized(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> CoreResult<bool> {
        let _guard = self.write_lock.lock();
        let key = rows::artifact_key(owner_id, artifact_type, artifact_id);
        let Some(mut row) = self.load(&key) else {
            return Ok(false);
        };
        if !row.is_fully_materialized {
            row.is_fully_materialized = true;
            self.store.put(ARTIFACT_TABLE, to_record(&key, &row)?)?;
        }
        Ok(true)
    }

    /// Removes every expired row, for all owners and types. Idempotent.
    /// Unreadable rows are removed as well.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn evict_expired(&self) -> CoreResult<usize> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();

        let mut batch = WriteBatch::new();
        for record in self.store.scan(ARTIFACT_TABLE)? {
            match rows::decode::<CachedArtifact>(&record.value) {
                Ok(row) if row.is_expired(now) => batch.push_delete(ARTIFACT_TABLE, record.key),
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %record.key, error = %e, "dropping unreadable artifact row");
                    batch.push_delete(ARTIFACT_TABLE, record.key);
                }
            }
        }

        let removed = batch.len();
        self.store.commit(batch)?;
        if removed > 0 {
            debug!(removed, "expiry sweep");
        }
        Ok(removed)
    }

    /// Trims an owner/type bucket to `max_items`, removing the least recently
    /// accessed rows first (ties broken by artifact id). Expiry plays no part.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn enforce_capacity(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        max_items: usize,
    ) -> CoreResult<usize> {
        let _guard = self.write_lock.lock();
        self.trim_locked(owner_id, artifact_type, max_items, None)
    }

    /// Returns row counts for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn stats(&self) -> CoreResult<CacheStats> {
        let now = self.clock.now();
        let mut stats = CacheStats::default();
        for record in self.store.scan(ARTIFACT_TABLE)? {
            let Ok(row) = rows::decode::<CachedArtifact>(&record.value) else {
                continue;
            };
            if row.is_expired(now) {
                stats.expired += 1;
            }
            if !row.is_fully_materialized {
                stats.not_materialized += 1;
            }
            *stats.per_type.entry(row.artifact_type).or_default() += 1;
            *stats.per_owner.entry(row.owner_id).or_default() += 1;
            stats.total += 1;
        }
        Ok(stats)
    }

    fn trim_locked(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        max_items: usize,
        keep: Option<&str>,
    ) -> CoreResult<usize> {
        let mut bucket = self.bucket(owner_id, artifact_type)?;
        if bucket.len() <= max_items {
            return Ok(0);
        }

        let excess = bucket.len() - max_items;
        bucket.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.artifact_id.cmp(&b.artifact_id))
        });

        let mut batch = WriteBatch::new();
        for row in bucket
            .iter()
            .filter(|row| Some(row.artifact_id.as_str()) != keep)
            .take(excess)
        {
            batch.push_delete(
                ARTIFACT_TABLE,
                rows::artifact_key(&row.owner_id, row.artifact_type, &row.artifact_id),
            );
        }

        let removed = batch.len();
        self.store.commit(batch)?;
        debug!(owner_id, %artifact_type, removed, max_items, "capacity eviction");
        Ok(removed)
    }

    /// Decoded rows of one owner/type bucket. Unreadable rows are dropped.
    fn bucket(&self, owner_id: &str, artifact_type: ArtifactType) -> CoreResult<Vec<CachedArtifact>> {
        let records = self.store.query(
            ARTIFACT_TABLE,
            OWNER_TYPE_INDEX,
            &rows::owner_type_value(owner_id, artifact_type),
        )?;

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            match rows::decode::<CachedArtifact>(&record.value) {
                Ok(row) => out.push(row),
                Err(e) => self.drop_unreadable(&record.key, &e.to_string()),
            }
        }
        Ok(out)
    }

    fn load(&self, key: &str) -> Option<CachedArtifact> {
        let record = match self.store.get(ARTIFACT_TABLE, key) {
            Ok(record) => record?,
            Err(e) => {
                warn!(key, error = %e, "artifact read failed");
                return None;
            }
        };
        match rows::decode(&record.value) {
            Ok(row) => Some(row),
            Err(e) => {
                self.drop_unreadable(key, &e.to_string());
                None
            }
        }
    }

    fn drop_unreadable(&self, key: &str, reason: &str) {
        warn!(key, reason, "dropping unreadable artifact row");
        if let Err(e) = self.store.delete(ARTIFACT_TABLE, key) {
            warn!(key, error = %e, "failed to drop unreadable artifact row");
        }
    }
}

fn to_record(key: &str, row: &CachedArtifact) -> CoreResult<Record> {
    Ok(Record::new(key, rows::encode(row)?)
        .with_index(OWNER_INDEX, row.owner_id.clone())
        .with_index(
            OWNER_TYPE_INDEX,
            rows::owner_type_value(&row.owner_id, row.artifact_type),
        ))
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("durable", &self.store.is_durable())
            .finish()
    }
}
