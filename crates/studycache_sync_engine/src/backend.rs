//! Backend client abstraction.
//!
//! The engine never talks to the network directly; the host supplies a
//! [`BackendClient`]. [`MockBackend`] is a scripted in-process implementation
//! for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use studycache_core::{ActionId, ArtifactType, OfflineAction, Snapshot, SnapshotItem};
use thiserror::Error;

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Timeout, 5xx or dropped connection: the same request may succeed later.
    #[error("transient: {0}")]
    Transient(String),
    /// Validation rejection or refused conflict: retrying cannot help.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Remote side of the sync engine.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Delivers one queued action. `Ok` is the backend's acknowledgement.
    async fn submit(&self, action: &OfflineAction) -> BackendResult<()>;

    /// Pulls the server's current state of one artifact type for an owner.
    async fn fetch_snapshot(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
    ) -> BackendResult<Snapshot>;
}

#[derive(Debug, Default)]
struct MockState {
    attempts: Vec<ActionId>,
    acknowledged: Vec<ActionId>,
    submit_script: HashMap<ActionId, VecDeque<BackendResult<()>>>,
    submit_default: Option<BackendError>,
    snapshots: HashMap<(String, ArtifactType), Vec<SnapshotItem>>,
    snapshot_failures: HashMap<(String, ArtifactType), VecDeque<BackendError>>,
    fetches: usize,
}

/// A scripted backend for testing.
///
/// Submissions succeed unless scripted otherwise; snapshots are empty unless
/// set. Every submit attempt is recorded in call order.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    latency: Mutex<Option<Duration>>,
    active_submits: AtomicUsize,
    max_active_submits: AtomicUsize,
}

impl MockBackend {
    /// Creates a backend that acknowledges everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes for successive submits of `action_id`. Once the script
    /// runs out the default outcome applies.
    pub fn script_submit(
        &self,
        action_id: ActionId,
        outcomes: impl IntoIterator<Item = BackendResult<()>>,
    ) {
        self.state
            .lock()
            .submit_script
            .entry(action_id)
            .or_default()
            .extend(outcomes);
    }

    /// Sets the outcome of unscripted submits: `None` acknowledges.
    pub fn set_submit_default(&self, error: Option<BackendError>) {
        self.state.lock().submit_default = error;
    }

    /// Sets the snapshot returned for an owner and type.
    pub fn set_snapshot(&self, owner_id: &str, artifact_type: ArtifactType, items: Vec<SnapshotItem>) {
        self.state
            .lock()
            .snapshots
            .insert((owner_id.to_string(), artifact_type), items);
    }

    /// Makes the next fetch of an owner and type fail with `error`.
    pub fn fail_next_fetch(&self, owner_id: &str, artifact_type: ArtifactType, error: BackendError) {
        self.state
            .lock()
            .snapshot_failures
            .entry((owner_id.to_string(), artifact_type))
            .or_default()
            .push_back(error);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Every submit attempt, in call order.
    pub fn attempts(&self) -> Vec<ActionId> {
        self.state.lock().attempts.clone()
    }

    /// Every acknowledged submit, in order.
    pub fn acknowledged(&self) -> Vec<ActionId> {
        self.state.lock().acknowledged.clone()
    }

    /// Number of snapshot fetches that completed.
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    /// Highest number of submits observed running at the same time.
    pub fn max_concurrent_submits(&self) -> usize {
        self.max_active_submits.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

struct ActiveSubmit<'a>(&'a AtomicUsize);

impl Drop for ActiveSubmit<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn submit(&self, action: &OfflineAction) -> BackendResult<()> {
        let active = self.active_submits.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveSubmit(&self.active_submits);
        self.max_active_submits.fetch_max(active, Ordering::SeqCst);
        self.state.lock().attempts.push(action.action_id.clone());

        self.delay().await;

        let mut state = self.state.lock();
        let scripted = state
            .submit_script
            .get_mut(&action.action_id)
            .and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match &state.submit_default {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };
        if outcome.is_ok() {
            state.acknowledged.push(action.action_id.clone());
        }
        outcome
    }

    async fn fetch_snapshot(
        &self,
        owner_id: &str,
        artifact_type: ArtifactType,
    ) -> BackendResult<Snapshot> {
        self.delay().await;

        let mut state = self.state.lock();
        let key = (owner_id.to_string(), artifact_type);
        if let Some(error) = state
            .snapshot_failures
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        state.fetches += 1;
        let items = state.snapshots.get(&key).cloned().unwrap_or_default();
        Ok(Snapshot::new(artifact_type, items))
    }
}
