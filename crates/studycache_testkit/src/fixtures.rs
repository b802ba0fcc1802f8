//! Test fixtures and store helpers.
//!
//! Every fixture runs on a [`ManualClock`] starting at [`TEST_EPOCH`], so
//! expiry and ordering are deterministic.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use studycache_core::{
    ActionQueue, CacheConfig, CacheStore, Clock, ManualClock, QueueConfig, Timestamp,
};
use studycache_storage::{FileStore, MemoryStore, PersistentStore};
use studycache_sync_engine::{
    BackoffPolicy, ConnectivitySignal, MockBackend, SyncConfig, SyncEngine, SyncEngineBuilder,
};
use tempfile::TempDir;

/// Start time of every fixture clock.
pub const TEST_EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// A test store with a manual clock and automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<dyn PersistentStore>,
    /// Clock shared by everything built from this fixture.
    pub clock: Arc<ManualClock>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(TEST_EPOCH)),
            temp_dir: None,
        }
    }

    /// Creates a file-backed test store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            clock: Arc::new(ManualClock::new(TEST_EPOCH)),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Simulates an app restart: drops this handle and opens the same
    /// directory again, keeping the clock.
    ///
    /// Anything still holding the old store (a cache, a queue) must be
    /// dropped first, since the directory lock is exclusive. In-memory
    /// stores are returned unchanged.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            clock,
            temp_dir,
        } = self;
        let Some(temp_dir) = temp_dir else {
            return Self {
                store,
                clock,
                temp_dir: None,
            };
        };
        drop(store);
        let store = FileStore::open(temp_dir.path()).expect("Failed to reopen file store");
        Self {
            store: Arc::new(store),
            clock,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the fixture clock as a trait object.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Builds a cache with default configuration.
    pub fn cache(&self) -> CacheStore {
        self.cache_with(CacheConfig::default())
    }

    /// Builds a cache with `config`.
    pub fn cache_with(&self, config: CacheConfig) -> CacheStore {
        CacheStore::new(self.store.clone(), self.clock(), config)
    }

    /// Opens the action queue with default configuration.
    pub fn queue(&self) -> ActionQueue {
        self.queue_with(QueueConfig::default())
    }

    /// Opens the action queue with `config`.
    pub fn queue_with(&self, config: QueueConfig) -> ActionQueue {
        ActionQueue::open(self.store.clone(), self.clock(), config)
            .expect("Failed to open action queue")
    }
}

impl std::fmt::Debug for TestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStore")
            .field("path", &self.path())
            .field("now", &self.clock.now())
            .finish()
    }
}

/// Runs a test with a cache over a temporary in-memory store.
pub fn with_temp_cache<F, R>(f: F) -> R
where
    F: FnOnce(&CacheStore, &ManualClock) -> R,
{
    let test_store = TestStore::memory();
    let cache = test_store.cache();
    f(&cache, &test_store.clock)
}

/// Runs a test with an action queue over a temporary file store.
pub fn with_file_queue<F, R>(f: F) -> R
where
    F: FnOnce(&ActionQueue, &Path) -> R,
{
    let test_store = TestStore::file();
    let queue = test_store.queue();
    let path = test_store.path().expect("File store should have a path");
    f(&queue, &path)
}

/// A sync engine wired to a scripted backend and a connectivity switch.
pub struct TestEngine {
    /// The engine under test.
    pub engine: SyncEngine,
    /// Scripted backend.
    pub backend: Arc<MockBackend>,
    /// Connectivity switch.
    pub signal: Arc<ConnectivitySignal>,
    /// The store and clock underneath the engine.
    pub store: TestStore,
}

impl TestEngine {
    /// Builds an online engine over an in-memory store.
    ///
    /// Backoff is disabled and no background intervals are configured, so
    /// cycles only run when a test asks for them.
    pub fn online() -> Self {
        Self::with_config(true, Self::quiet_config())
    }

    /// Builds an offline engine over an in-memory store.
    pub fn offline() -> Self {
        Self::with_config(false, Self::quiet_config())
    }

    /// Builds an engine over an in-memory store with `config`.
    pub fn with_config(online: bool, config: SyncConfig) -> Self {
        Self::over(TestStore::memory(), online, config)
    }

    /// Builds an engine over an existing fixture store.
    pub fn over(store: TestStore, online: bool, config: SyncConfig) -> Self {
        let backend = Arc::new(MockBackend::new());
        let signal = Arc::new(ConnectivitySignal::new(online));
        let engine = SyncEngineBuilder::new(store.store.clone(), backend.clone(), signal.clone())
            .with_clock(store.clock())
            .with_sync_config(config)
            .build()
            .expect("Failed to build sync engine");
        Self {
            engine,
            backend,
            signal,
            store,
        }
    }

    /// Drops the engine and hands back its store, ready for
    /// [`TestStore::reopen`].
    pub fn into_store(self) -> TestStore {
        self.store
    }

    /// Sync configuration with no backoff and no background intervals.
    pub fn quiet_config() -> SyncConfig {
        SyncConfig::default()
            .with_backoff(BackoffPolicy::none())
            .with_sync_interval(None)
            .with_sweep_interval(None)
    }
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl std::fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use studycache_core::{ArtifactType, NewArtifact};

    #[test]
    fn memory_store_has_no_path() {
        let store = TestStore::memory();
        assert!(store.path().is_none());
        assert!(!store.store.is_durable());
    }

    #[test]
    fn reopen_keeps_queued_actions_and_clock() {
        let store = TestStore::file();
        store.clock.advance(Duration::from_secs(5));
        {
            let queue = store.queue();
            queue.enqueue("u1", "submit_answer", vec![1]).unwrap();
        }
        let store = store.reopen();
        assert_eq!(store.queue().depth("u1").unwrap(), 1);
        assert_eq!(
            store.clock.now(),
            TEST_EPOCH.saturating_add(Duration::from_secs(5))
        );
    }

    #[test]
    fn temp_cache_uses_the_fixture_clock() {
        with_temp_cache(|cache, clock| {
            let written = cache
                .put(NewArtifact::new("u1", ArtifactType::Quiz, "q1", vec![1]))
                .unwrap();
            assert_eq!(written.cached_at, clock.now());
        });
    }

    #[test]
    fn file_queue_lives_in_the_temp_dir() {
        with_file_queue(|queue, path| {
            queue.enqueue("u1", "rate", vec![]).unwrap();
            assert!(path.join(studycache_storage::LOG_FILE).exists());
        });
    }
}
