//! Sync cycle state machine.
//!
//! A cycle for one owner runs `Idle → Syncing → {Completed, Error} → Idle`:
//!
//! 1. Drain the owner's action queue strictly in order. A transient failure
//!    backs off and retries the same action; a permanent one leaves a dead
//!    letter that blocks the rest of the queue.
//! 2. Pull a snapshot of every configured artifact type, resolve it against
//!    local state and write the result into the cache.
//!
//! At most one cycle per owner runs at a time. Losing connectivity cancels
//! the cycle without penalising the action that was in flight.

use crate::backend::{BackendClient, BackendError};
use crate::config::SyncConfig;
use crate::connectivity::{went_offline, ConnectivityObserver};
use crate::error::{SyncError, SyncResult};
use crate::status::StatusPublisher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use studycache_core::{
    resolve, ActionQueue, ArtifactType, CacheStore, Clock, FailureOutcome, SyncState,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of a sync trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran to completion.
    Completed(CycleReport),
    /// Another cycle for the owner is running; this trigger was a no-op.
    AlreadyRunning,
    /// The previous cycle failed and is still cooling down; no-op.
    CoolingDown,
    /// The device is offline; nothing was attempted.
    Offline,
    /// Connectivity was lost mid-cycle; the queue is untouched.
    Cancelled,
}

/// What a completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Actions acknowledged by the backend.
    pub delivered: usize,
    /// Failed attempts that were retried.
    pub retries: usize,
    /// Artifacts written to the cache.
    pub artifacts_written: usize,
    /// Written artifacts identical to the cached row.
    pub unchanged: usize,
    /// Queued actions the pulled snapshots may not reflect yet.
    pub awaiting_ack: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Syncing,
    CoolingDown,
}

type ActiveOwners = Arc<Mutex<HashMap<String, Phase>>>;

/// Holds an owner's single-flight slot; releases it on drop.
#[derive(Debug)]
pub(crate) struct FlightGuard {
    owner_id: String,
    active: ActiveOwners,
}

impl FlightGuard {
    fn set_phase(&self, phase: Phase) {
        self.active.lock().insert(self.owner_id.clone(), phase);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.owner_id);
    }
}

/// Drives sync cycles.
pub struct SyncOrchestrator {
    cache: Arc<CacheStore>,
    queue: Arc<ActionQueue>,
    backend: Arc<dyn BackendClient>,
    connectivity: Arc<dyn ConnectivityObserver>,
    status: Arc<StatusPublisher>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    active: ActiveOwners,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over the given components.
    pub fn new(
        cache: Arc<CacheStore>,
        queue: Arc<ActionQueue>,
        backend: Arc<dyn BackendClient>,
        connectivity: Arc<dyn ConnectivityObserver>,
        status: Arc<StatusPublisher>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            queue,
            backend,
            connectivity,
            status,
            clock,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns true while a cycle (or its cool-down) holds `owner_id`.
    pub fn is_running(&self, owner_id: &str) -> bool {
        self.active.lock().contains_key(owner_id)
    }

    /// Runs one sync cycle for `owner_id` and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the unrecoverable failure (a dead letter blocking the queue,
    /// a failed pull, or a storage error) after the status has recorded
    /// `Error` and the cool-down has elapsed.
    pub async fn run_cycle(&self, owner_id: &str) -> SyncResult<CycleOutcome> {
        match self.try_acquire(owner_id) {
            Ok(guard) => self.run_guarded(guard).await,
            Err(outcome) => Ok(outcome),
        }
    }

    /// Claims the owner's single-flight slot, or reports why it is taken.
    pub(crate) fn try_acquire(&self, owner_id: &str) -> Result<FlightGuard, CycleOutcome> {
        let mut active = self.active.lock();
        match active.get(owner_id) {
            Some(Phase::Syncing) => return Err(CycleOutcome::AlreadyRunning),
            Some(Phase::CoolingDown) => return Err(CycleOutcome::CoolingDown),
            None => {}
        }
        active.insert(owner_id.to_string(), Phase::Syncing);
        Ok(FlightGuard {
            owner_id: owner_id.to_string(),
            active: self.active.clone(),
        })
    }

    pub(crate) async fn run_guarded(&self, guard: FlightGuard) -> SyncResult<CycleOutcome> {
        let owner = guard.owner_id.clone();
        let owner_id = owner.as_str();
        if !self.connectivity.is_online() {
            debug!(owner_id, "offline, skipping sync");
            return Ok(CycleOutcome::Offline);
        }

        let depth = self.queue.depth(owner_id)?;
        let started = self.clock.now();
        self.status.update(owner_id, |s| {
            s.state = SyncState::Syncing;
            s.last_attempt_at = Some(started);
            s.pending_count = depth;
        });
        info!(owner_id, pending = depth, "sync cycle started");

        let mut online = self.connectivity.watch();
        let mut report = CycleReport::default();
        match self.cycle(owner_id, &mut online, &mut report).await {
            Ok(()) => {
                let finished = self.clock.now();
                self.status.update(owner_id, |s| {
                    s.state = SyncState::Completed;
                    s.last_sync_at = Some(finished);
                    s.initial_sync_complete = true;
                    s.last_error = None;
                });
                self.status.update(owner_id, |s| s.state = SyncState::Idle);
                info!(
                    owner_id,
                    delivered = report.delivered,
                    written = report.artifacts_written,
                    "sync cycle completed"
                );
                Ok(CycleOutcome::Completed(report))
            }
            Err(SyncError::Cancelled) => {
                self.status.update(owner_id, |s| s.state = SyncState::Idle);
                info!(owner_id, "sync cycle cancelled, connectivity lost");
                Ok(CycleOutcome::Cancelled)
            }
            Err(e) => {
                let message = e.to_string();
                self.status.update(owner_id, |s| {
                    s.state = SyncState::Error;
                    s.last_error = Some(message);
                });
                error!(owner_id, error = %e, "sync cycle failed");

                guard.set_phase(Phase::CoolingDown);
                tokio::time::sleep(self.config.error_cooldown).await;
                self.status.update(owner_id, |s| s.state = SyncState::Idle);
                Err(e)
            }
        }
    }

    async fn cycle(
        &self,
        owner_id: &str,
        online: &mut watch::Receiver<bool>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        self.drain(owner_id, online, report).await?;
        let blocking = self.queue.blocking_action(owner_id)?;

        // Pull even when blocked so cached content stays fresh
        let mut first_error = None;
        for &artifact_type in &self.config.artifact_types {
            match self.pull(owner_id, artifact_type, online, report).await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(owner_id, %artifact_type, error = %e, "pull failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(action) = blocking {
            return Err(SyncError::Blocked {
                action_id: action.action_id.to_string(),
                reason: action.last_error.unwrap_or_default(),
            });
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Delivers actions in order until the queue is empty or blocked.
    async fn drain(
        &self,
        owner_id: &str,
        online: &mut watch::Receiver<bool>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        loop {
            if !*online.borrow_and_update() {
                return Err(SyncError::Cancelled);
            }
            let Some(next) = self.queue.next_for_delivery(owner_id)? else {
                return Ok(());
            };
            let action = self.queue.mark_in_flight(&next.action_id)?;
            let action_id = &action.action_id;

            let outcome = tokio::select! {
                biased;
                _ = went_offline(online) => None,
                result = tokio::time::timeout(self.config.request_timeout, self.backend.submit(&action)) => Some(result),
            };

            let reason = match outcome {
                None => {
                    self.queue.release(action_id)?;
                    debug!(%action_id, "delivery abandoned, connectivity lost");
                    return Err(SyncError::Cancelled);
                }
                Some(Ok(Ok(()))) => {
                    self.queue.mark_synced(action_id)?;
                    report.delivered += 1;
                    continue;
                }
                Some(Ok(Err(BackendError::Rejected(reason)))) => {
                    self.queue.mark_rejected(action_id, reason)?;
                    continue;
                }
                Some(Ok(Err(BackendError::Transient(reason)))) => reason,
                Some(Err(_elapsed)) => SyncError::Timeout.to_string(),
            };

            match self.queue.mark_failed(action_id, reason)? {
                FailureOutcome::Retry { retry_count } => {
                    report.retries += 1;
                    let delay = self.config.backoff.delay_for_retry(retry_count);
                    debug!(%action_id, retry_count, ?delay, "backing off before retry");
                    self.pause(delay, online).await?;
                }
                // The dead letter is now the head; the next lookup ends the drain
                FailureOutcome::Exhausted => {}
            }
        }
    }

    /// Fetches, resolves and caches one artifact type.
    async fn pull(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
        online: &mut watch::Receiver<bool>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let max_retries = self.queue.config().max_retries;
        let mut retries = 0u32;
        let snapshot = loop {
            if !*online.borrow_and_update() {
                return Err(SyncError::Cancelled);
            }
            let fetched = tokio::select! {
                biased;
                _ = went_offline(online) => return Err(SyncError::Cancelled),
                result = tokio::time::timeout(
                    self.config.request_timeout,
                    self.backend.fetch_snapshot(owner_id, artifact_type),
                ) => result,
            };
            let err = match fetched {
                Ok(Ok(snapshot)) => break snapshot,
                Ok(Err(e)) => SyncError::from(e),
                Err(_elapsed) => SyncError::Timeout,
            };
            if !err.is_retryable() || retries >= max_retries {
                return Err(SyncError::Pull {
                    artifact_type,
                    message: err.to_string(),
                });
            }
            retries += 1;
            report.retries += 1;
            self.pause(self.config.backoff.delay_for_retry(retries), online)
                .await?;
        };

        if snapshot.artifact_type != artifact_type {
            return Err(SyncError::Pull {
                artifact_type,
                message: format!("backend returned a {} snapshot", snapshot.artifact_type),
            });
        }

        let cached = self.cache.list(owner_id, artifact_type)?;
        let queued = self.queue.actions(owner_id)?;
        let resolution = resolve(owner_id, &snapshot, &cached, &queued);
        for artifact in resolution.artifacts {
            self.cache.put(artifact)?;
            report.artifacts_written += 1;
        }
        report.unchanged += resolution.unchanged;
        report.awaiting_ack += resolution.awaiting_ack.len();
        debug!(
            owner_id,
            %artifact_type,
            items = snapshot.items.len(),
            awaiting_ack = resolution.awaiting_ack.len(),
            "snapshot applied"
        );
        Ok(())
    }

    /// Sleeps for `delay` unless connectivity is lost first.
    async fn pause(&self, delay: Duration, online: &mut watch::Receiver<bool>) -> SyncResult<()> {
        tokio::select! {
            biased;
            _ = went_offline(online) => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .field("active", &self.active.lock().len())
            .finish()
    }
}
