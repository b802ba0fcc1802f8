//! Per-owner synchronization status.
//!
//! The publisher is the single writer of [`SyncStatus`] rows. Every update is
//! persisted to the status table (so `initial_sync_complete` and
//! `last_sync_at` survive restarts) and then pushed to subscribers.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use studycache_core::{DepthListener, SyncStatus, SYNC_STATUS_TABLE};
use studycache_storage::{codec, PersistentStore, Record};
use tokio::sync::watch;
use tracing::warn;

/// Publishes the status of every owner.
pub struct StatusPublisher {
    store: Arc<dyn PersistentStore>,
    channels: Mutex<HashMap<String, watch::Sender<SyncStatus>>>,
}

impl StatusPublisher {
    /// Creates a publisher backed by `store`.
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the current status of `owner_id`.
    pub fn current(&self, owner_id: &str) -> SyncStatus {
        let mut channels = self.channels.lock();
        let status = self.channel(&mut channels, owner_id).borrow().clone();
        status
    }

    /// Returns a subscription that yields every subsequent status change.
    pub fn subscribe(&self, owner_id: &str) -> StatusSubscription {
        let mut channels = self.channels.lock();
        let rx = self.channel(&mut channels, owner_id).subscribe();
        StatusSubscription { rx }
    }

    /// Applies `edit` to the owner's status, persists it and notifies
    /// subscribers. Returns the new status.
    pub fn update(&self, owner_id: &str, edit: impl FnOnce(&mut SyncStatus)) -> SyncStatus {
        self.update_if(owner_id, |status| {
            edit(status);
            true
        })
    }

    /// Like [`StatusPublisher::update`], but only persists and notifies when
    /// `edit` returns true. Read, edit and publish happen under one lock.
    fn update_if(
        &self,
        owner_id: &str,
        edit: impl FnOnce(&mut SyncStatus) -> bool,
    ) -> SyncStatus {
        let mut channels = self.channels.lock();
        let tx = self.channel(&mut channels, owner_id);
        let mut status = tx.borrow().clone();
        if edit(&mut status) {
            self.persist(&status);
            tx.send_replace(status.clone());
        }
        status
    }

    /// Owners with a stored status row.
    pub fn owners(&self) -> Vec<String> {
        let mut owners: BTreeSet<String> = match self.store.scan(SYNC_STATUS_TABLE) {
            Ok(records) => records.into_iter().map(|r| r.key).collect(),
            Err(e) => {
                warn!(error = %e, "could not list status rows");
                BTreeSet::new()
            }
        };
        owners.extend(self.channels.lock().keys().cloned());
        owners.into_iter().collect()
    }

    fn channel<'a>(
        &self,
        channels: &'a mut HashMap<String, watch::Sender<SyncStatus>>,
        owner_id: &str,
    ) -> &'a watch::Sender<SyncStatus> {
        channels
            .entry(owner_id.to_string())
            .or_insert_with(|| watch::channel(self.load(owner_id)).0)
    }

    fn load(&self, owner_id: &str) -> SyncStatus {
        let record = match self.store.get(SYNC_STATUS_TABLE, owner_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(owner_id, error = %e, "could not read status row");
                None
            }
        };
        let Some(record) = record else {
            return SyncStatus::new(owner_id);
        };
        match codec::from_cbor::<SyncStatus>(&record.value) {
            Ok(status) => status,
            Err(e) => {
                warn!(owner_id, error = %e, "dropping unreadable status row");
                if let Err(e) = self.store.delete(SYNC_STATUS_TABLE, owner_id) {
                    warn!(owner_id, error = %e, "failed to drop status row");
                }
                SyncStatus::new(owner_id)
            }
        }
    }

    fn persist(&self, status: &SyncStatus) {
        let written = codec::to_cbor(status).and_then(|value| {
            self.store
                .put(SYNC_STATUS_TABLE, Record::new(status.owner_id.clone(), value))
        });
        // Subscribers still see the update; it is only lost across a restart
        if let Err(e) = written {
            warn!(owner_id = %status.owner_id, error = %e, "failed to persist status");
        }
    }
}

impl DepthListener for StatusPublisher {
    fn depth_changed(&self, owner_id: &str, depth: usize) {
        self.update_if(owner_id, |status| {
            let changed = status.pending_count != depth;
            status.pending_count = depth;
            changed
        });
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("owners", &self.channels.lock().len())
            .finish()
    }
}

/// A stream of one owner's [`SyncStatus`].
#[derive(Debug, Clone)]
pub struct StatusSubscription {
    rx: watch::Receiver<SyncStatus>,
}

impl StatusSubscription {
    /// The latest status, marking it seen.
    pub fn current(&mut self) -> SyncStatus {
        self.rx.borrow_and_update().clone()
    }

    /// Waits for the next change and returns it. Returns `None` once the
    /// publisher is gone.
    pub async fn changed(&mut self) -> Option<SyncStatus> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
