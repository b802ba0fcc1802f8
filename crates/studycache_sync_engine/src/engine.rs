//! Application-facing engine.
//!
//! [`SyncEngine`] wires the cache, the action queue, the orchestrator and the
//! status publisher over one persistent store, and exposes the operations the
//! UI layer needs. [`SyncEngine::start`] runs the background scheduler:
//! a sync for every known owner when connectivity returns and on a timer,
//! plus a periodic expiry sweep.

use crate::backend::BackendClient;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityObserver;
use crate::error::SyncResult;
use crate::orchestrator::{CycleOutcome, SyncOrchestrator};
use crate::status::{StatusPublisher, StatusSubscription};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use studycache_core::{
    ActionId, ActionQueue, ArtifactType, CacheConfig, CacheStore, CachedArtifact, Clock,
    OfflineAction, QueueConfig, SyncStatus, SystemClock,
};
use studycache_storage::PersistentStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Builds a [`SyncEngine`].
pub struct SyncEngineBuilder {
    store: Arc<dyn PersistentStore>,
    backend: Arc<dyn BackendClient>,
    connectivity: Arc<dyn ConnectivityObserver>,
    clock: Arc<dyn Clock>,
    cache_config: CacheConfig,
    queue_config: QueueConfig,
    sync_config: SyncConfig,
}

impl SyncEngineBuilder {
    /// Starts a builder with default configuration and the system clock.
    pub fn new(
        store: Arc<dyn PersistentStore>,
        backend: Arc<dyn BackendClient>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            clock: Arc::new(SystemClock),
            cache_config: CacheConfig::default(),
            queue_config: QueueConfig::default(),
            sync_config: SyncConfig::default(),
        }
    }

    /// Sets the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the cache configuration.
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Sets the queue configuration.
    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// Sets the sync configuration.
    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// Opens the engine. Actions left in flight by a previous run are
    /// returned to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be recovered from the store.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let cache = Arc::new(CacheStore::new(
            self.store.clone(),
            self.clock.clone(),
            self.cache_config,
        ));
        let queue = Arc::new(ActionQueue::open(
            self.store.clone(),
            self.clock.clone(),
            self.queue_config,
        )?);
        let status = Arc::new(StatusPublisher::new(self.store));
        queue.set_listener(status.clone());

        let orchestrator = Arc::new(SyncOrchestrator::new(
            cache.clone(),
            queue.clone(),
            self.backend,
            self.connectivity.clone(),
            status.clone(),
            self.clock,
            self.sync_config.clone(),
        ));

        Ok(SyncEngine {
            cache,
            queue,
            status,
            orchestrator,
            connectivity: self.connectivity,
            config: self.sync_config,
        })
    }
}

/// The offline cache and sync engine.
#[derive(Clone)]
pub struct SyncEngine {
    cache: Arc<CacheStore>,
    queue: Arc<ActionQueue>,
    status: Arc<StatusPublisher>,
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: Arc<dyn ConnectivityObserver>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Reads a cached artifact. A miss (absent, expired or unreadable) is
    /// `None`, never an error.
    pub fn read(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> Option<CachedArtifact> {
        self.cache.get(owner_id, artifact_type, artifact_id)
    }

    /// Queues a mutation. Never waits for the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be persisted.
    pub fn enqueue_action(
        &self,
        owner_id: &str,
        action_type: &str,
        payload: Vec<u8>,
    ) -> SyncResult<ActionId> {
        Ok(self.queue.enqueue(owner_id, action_type, payload)?)
    }

    /// Queues a mutation that affects artifacts of `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be persisted.
    pub fn enqueue_action_for(
        &self,
        owner_id: &str,
        action_type: &str,
        target: ArtifactType,
        payload: Vec<u8>,
    ) -> SyncResult<ActionId> {
        Ok(self.queue.enqueue_for(owner_id, action_type, target, payload)?)
    }

    /// Subscribes to an owner's status.
    pub fn observe_status(&self, owner_id: &str) -> StatusSubscription {
        self.status.subscribe(owner_id)
    }

    /// Returns an owner's current status.
    pub fn status(&self, owner_id: &str) -> SyncStatus {
        self.status.current(owner_id)
    }

    /// Starts a sync cycle for `owner_id` in the background. Returns false
    /// if a cycle is already running or cooling down, if the device is
    /// offline, or if called outside a tokio runtime.
    pub fn trigger_sync(&self, owner_id: &str) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(owner_id, "sync triggered outside a runtime");
            return false;
        };
        if !self.connectivity.is_online() {
            debug!(owner_id, "offline, sync not started");
            return false;
        }
        let guard = match self.orchestrator.try_acquire(owner_id) {
            Ok(guard) => guard,
            Err(outcome) => {
                debug!(owner_id, ?outcome, "sync not started");
                return false;
            }
        };

        let orchestrator = self.orchestrator.clone();
        runtime.spawn(async move {
            // Failures are recorded in the owner's status
            let _ = orchestrator.run_guarded(guard).await;
        });
        true
    }

    /// Runs a sync cycle for `owner_id` and waits for it.
    ///
    /// # Errors
    ///
    /// See [`SyncOrchestrator::run_cycle`].
    pub async fn sync_now(&self, owner_id: &str) -> SyncResult<CycleOutcome> {
        self.orchestrator.run_cycle(owner_id).await
    }

    /// Records that every nested resource of an artifact is now local.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn mark_materialized(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        artifact_id: &str,
    ) -> SyncResult<bool> {
        Ok(self
            .cache
            .mark_materialized(owner_id, artifact_type, artifact_id)?)
    }

    /// Returns the actions of `owner_id` that failed permanently.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn dead_letters(&self, owner_id: &str) -> SyncResult<Vec<OfflineAction>> {
        Ok(self.queue.dead_letters(owner_id)?)
    }

    /// Gives a dead letter a fresh retry budget. It is delivered on the next
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is unknown or not a dead letter.
    pub fn retry_dead_letter(&self, action_id: &ActionId) -> SyncResult<()> {
        Ok(self.queue.retry_dead_letter(action_id)?)
    }

    /// Drops a dead letter, unblocking its owner's queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is unknown or not a dead letter.
    pub fn discard_dead_letter(&self, action_id: &ActionId) -> SyncResult<OfflineAction> {
        Ok(self.queue.discard(action_id)?)
    }

    /// Removes every expired artifact. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn sweep(&self) -> SyncResult<usize> {
        Ok(self.cache.evict_expired()?)
    }

    /// Owners with queued actions or a recorded status.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn known_owners(&self) -> SyncResult<Vec<String>> {
        let mut owners: BTreeSet<String> = self.queue.owners()?.into_iter().collect();
        owners.extend(self.status.owners());
        Ok(owners.into_iter().collect())
    }

    /// The cache store.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The action queue.
    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// The orchestrator.
    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Spawns the background scheduler on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_scheduler(self.clone(), shutdown_rx));
        info!("sync scheduler started");
        EngineHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn trigger_all(&self) {
        match self.known_owners() {
            Ok(owners) => {
                for owner_id in owners {
                    self.trigger_sync(&owner_id);
                }
            }
            Err(e) => warn!(error = %e, "could not list owners to sync"),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to the background scheduler. Dropping it also stops the scheduler.
#[derive(Debug)]
pub struct EngineHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Stops the scheduler and waits for it to exit. Cycles already running
    /// finish on their own.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync scheduler ended abnormally");
        }
        info!("sync scheduler stopped");
    }
}

fn ticker(period: Option<Duration>) -> Option<Interval> {
    period.filter(|p| !p.is_zero()).map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_scheduler(engine: SyncEngine, mut shutdown: oneshot::Receiver<()>) {
    let mut online = engine.connectivity.watch();
    let mut was_online = *online.borrow_and_update();
    let mut watching = true;
    let mut sync_tick = ticker(engine.config.sync_interval);
    let mut sweep_tick = ticker(engine.config.sweep_interval);

    if was_online {
        engine.trigger_all();
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            changed = online.changed(), if watching => {
                if changed.is_err() {
                    warn!("connectivity observer closed, reconnect triggers disabled");
                    watching = false;
                } else {
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        info!("connectivity regained, syncing known owners");
                        engine.trigger_all();
                    }
                    was_online = now_online;
                }
            }
            _ = tick(&mut sync_tick) => {
                debug!("periodic sync");
                engine.trigger_all();
            }
            _ = tick(&mut sweep_tick) => {
                match engine.sweep() {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "expired artifacts swept"),
                    Err(e) => warn!(error = %e, "expiry sweep failed"),
                }
            }
        }
    }
}
