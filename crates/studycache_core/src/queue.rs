//! Durable, ordered queue of offline actions.
//!
//! Delivery is strictly FIFO per owner. A dead letter (terminal `Failed`
//! action) at the head of an owner's queue blocks every later action of that
//! owner until it is retried or explicitly discarded: actions of one owner are
//! assumed to depend on each other (an answer submission must land before the
//! matching "complete session").

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{ActionId, ActionState, ArtifactType, OfflineAction};
use crate::rows::{self, ACTION_TABLE, OWNER_INDEX, QUEUE_META_TABLE};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use studycache_storage::{PersistentStore, Record, WriteBatch};
use tracing::{debug, info, warn};

/// Receives the live queue depth of an owner after every queue mutation.
pub trait DepthListener: Send + Sync {
    /// Called with the number of non-synced actions now queued for `owner_id`.
    ///
    /// Runs under the queue's write lock; implementations must not call
    /// mutating queue operations.
    fn depth_changed(&self, owner_id: &str, depth: usize);
}

/// Outcome of [`ActionQueue::mark_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `Pending`; `retry_count` attempts have failed so far.
    Retry {
        /// Failed attempts so far.
        retry_count: u32,
    },
    /// Retry budget exhausted; the action is now a dead letter.
    Exhausted,
}

/// Durable FIFO of [`OfflineAction`] rows, partitioned by owner.
///
/// The queue exclusively owns the action table and the per-owner sequence
/// table. Every mutation is a single atomic store batch; an action is durable
/// once [`ActionQueue::enqueue`] returns.
pub struct ActionQueue {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    write_lock: Mutex<()>,
    listener: RwLock<Option<Arc<dyn DepthListener>>>,
}

impl ActionQueue {
    /// Opens the queue over `store`, recovering from an interrupted run:
    /// actions left `InFlight` by a previous process revert to `Pending`
    /// without counting as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn open(
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> CoreResult<Self> {
        let queue = Self {
            store,
            clock,
            config,
            write_lock: Mutex::new(()),
            listener: RwLock::new(None),
        };
        queue.recover()?;
        Ok(queue)
    }

    /// Installs the depth listener.
    pub fn set_listener(&self, listener: Arc<dyn DepthListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Returns the configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn recover(&self) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::new();
        for record in self.store.scan(ACTION_TABLE)? {
            match rows::decode::<OfflineAction>(&record.value) {
                Ok(mut action) => match action.state {
                    ActionState::InFlight => {
                        action.state = ActionState::Pending;
                        batch.push_put(ACTION_TABLE, to_record(&action)?);
                    }
                    ActionState::Synced => {
                        // Acknowledged rows are removed on ack; a leftover is
                        // safe to drop
                        batch.push_delete(ACTION_TABLE, record.key);
                    }
                    ActionState::Pending | ActionState::Failed => {}
                },
                Err(e) => {
                    warn!(key = %record.key, error = %e, "dropping unreadable action row");
                    batch.push_delete(ACTION_TABLE, record.key);
                }
            }
        }
        if !batch.is_empty() {
            info!(rows = batch.len(), "recovered action queue");
        }
        self.store.commit(batch)?;
        Ok(())
    }

    /// Queues a mutation. The action is persisted before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if `owner_id` is empty or the action cannot be
    /// persisted.
    pub fn enqueue(
        &self,
        owner_id: &str,
        action_type: &str,
        payload: Vec<u8>,
    ) -> CoreResult<ActionId> {
        self.enqueue_inner(owner_id, action_type, None, payload)
    }

    /// Queues a mutation that affects cached artifacts of `target`.
    ///
    /// # Errors
    ///
    /// See [`ActionQueue::enqueue`].
    pub fn enqueue_for(
        &self,
        owner_id: &str,
        action_type: &str,
        target: ArtifactType,
        payload: Vec<u8>,
    ) -> CoreResult<ActionId> {
        self.enqueue_inner(owner_id, action_type, Some(target), payload)
    }

    fn enqueue_inner(
        &self,
        owner_id: &str,
        action_type: &str,
        target: Option<ArtifactType>,
        payload: Vec<u8>,
    ) -> CoreResult<ActionId> {
        if owner_id.is_empty() {
            return Err(CoreError::InvalidArgument("owner_id must not be empty".into()));
        }
        if action_type.is_empty() {
            return Err(CoreError::InvalidArgument("action_type must not be empty".into()));
        }

        let id = {
            let _guard = self.write_lock.lock();
            let sequence = self.next_sequence(owner_id)?;
            let action = OfflineAction {
                action_id: ActionId::new(owner_id, sequence),
                owner_id: owner_id.to_string(),
                action_type: action_type.to_string(),
                target,
                payload,
                queued_at: self.clock.now(),
                retry_count: 0,
                state: ActionState::Pending,
                last_error: None,
            };

            // Row and counter in one batch: a crash cannot reuse a sequence
            let batch = WriteBatch::new()
                .put(ACTION_TABLE, to_record(&action)?)
                .put(
                    QUEUE_META_TABLE,
                    Record::new(owner_id, rows::encode(&(sequence + 1))?),
                );
            self.store.commit(batch)?;
            self.notify(owner_id);
            action.action_id
        };

        debug!(action_id = %id, action_type, "enqueued action");
        Ok(id)
    }

    fn next_sequence(&self, owner_id: &str) -> CoreResult<u64> {
        let stored = match self.store.get(QUEUE_META_TABLE, owner_id)? {
            Some(record) => match rows::decode::<u64>(&record.value) {
                Ok(next) => next,
                Err(e) => {
                    warn!(owner_id, error = %e, "unreadable sequence counter, rebuilding");
                    1
                }
            },
            None => 1,
        };
        // Never go below what is already queued, even if the counter was lost
        let floor = self
            .actions(owner_id)?
            .last()
            .map_or(1, |a| a.action_id.sequence + 1);
        Ok(stored.max(floor))
    }

    /// Returns the action that should be delivered next for `owner_id`: the
    /// oldest action, provided it is deliverable. Returns `None` if the queue
    /// is empty or its head is a dead letter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn next_for_delivery(&self, owner_id: &str) -> CoreResult<Option<OfflineAction>> {
        Ok(self
            .actions(owner_id)?
            .into_iter()
            .next()
            .filter(|head| head.state.is_deliverable()))
    }

    /// Returns the dead letter blocking `owner_id`'s queue, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn blocking_action(&self, owner_id: &str) -> CoreResult<Option<OfflineAction>> {
        Ok(self
            .actions(owner_id)?
            .into_iter()
            .next()
            .filter(|head| head.state == ActionState::Failed))
    }

    /// Looks up an action.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self, action_id: &ActionId) -> CoreResult<Option<OfflineAction>> {
        let Some(record) = self.store.get(ACTION_TABLE, &rows::action_key(action_id))? else {
            return Ok(None);
        };
        match rows::decode(&record.value) {
            Ok(action) => Ok(Some(action)),
            Err(e) => {
                self.drop_unreadable(&record.key, &e.to_string());
                Ok(None)
            }
        }
    }

    /// `Pending → InFlight`. Returns the updated action.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` or `InvalidTransition` (for dead letters).
    pub fn mark_in_flight(&self, action_id: &ActionId) -> CoreResult<OfflineAction> {
        self.transition(action_id, "mark_in_flight", |action| match action.state {
            ActionState::Pending | ActionState::InFlight => {
                action.state = ActionState::InFlight;
                Ok(Change::Update)
            }
            ActionState::Synced | ActionState::Failed => Err(action.state),
        })
    }

    /// Records backend acknowledgement. This is the only path that removes a
    /// delivered action. Returns the final action in state `Synced`.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` or `InvalidTransition` (for dead letters).
    pub fn mark_synced(&self, action_id: &ActionId) -> CoreResult<OfflineAction> {
        let mut action = self.transition(action_id, "mark_synced", |action| match action.state {
            ActionState::Pending | ActionState::InFlight => Ok(Change::Remove),
            ActionState::Synced | ActionState::Failed => Err(action.state),
        })?;
        action.state = ActionState::Synced;
        debug!(%action_id, "action acknowledged");
        Ok(action)
    }

    /// Records a transient delivery failure. The action goes back to
    /// `Pending` unless its retry count now exceeds the ceiling, in which case
    /// it becomes a dead letter.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` or `InvalidTransition` (for dead letters).
    pub fn mark_failed(
        &self,
        action_id: &ActionId,
        reason: impl Into<String>,
    ) -> CoreResult<FailureOutcome> {
        let reason = reason.into();
        let max_retries = self.config.max_retries;
        let action = self.transition(action_id, "mark_failed", |action| match action.state {
            ActionState::Pending | ActionState::InFlight => {
                action.retry_count = action.retry_count.saturating_add(1);
                action.last_error = Some(reason.clone());
                action.state = if action.retry_count > max_retries {
                    ActionState::Failed
                } else {
                    ActionState::Pending
                };
                Ok(Change::Update)
            }
            ActionState::Synced | ActionState::Failed => Err(action.state),
        })?;

        if action.state == ActionState::Failed {
            warn!(%action_id, retries = action.retry_count, %reason, "action exhausted its retries");
            Ok(FailureOutcome::Exhausted)
        } else {
            debug!(%action_id, retries = action.retry_count, %reason, "action delivery failed");
            Ok(FailureOutcome::Retry {
                retry_count: action.retry_count,
            })
        }
    }

    /// Records a permanent rejection: the action becomes a dead letter
    /// immediately, whatever its retry budget.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` or `InvalidTransition` (for dead letters).
    pub fn mark_rejected(&self, action_id: &ActionId, reason: impl Into<String>) -> CoreResult<()> {
        let reason = reason.into();
        self.transition(action_id, "mark_rejected", |action| match action.state {
            ActionState::Pending | ActionState::InFlight => {
                action.state = ActionState::Failed;
                action.last_error = Some(reason.clone());
                Ok(Change::Update)
            }
            ActionState::Synced | ActionState::Failed => Err(action.state),
        })?;
        warn!(%action_id, %reason, "action rejected by backend");
        Ok(())
    }

    /// `InFlight → Pending` without counting a failed attempt. Used when a
    /// delivery is abandoned before it completed.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` or `InvalidTransition` (for dead letters).
    pub fn release(&self, action_id: &ActionId) -> CoreResult<()> {
        self.transition(action_id, "release", |action| match action.state {
            ActionState::InFlight => {
                action.state = ActionState::Pending;
                Ok(Change::Update)
            }
            ActionState::Pending => Ok(Change::Unchanged),
            ActionState::Synced | ActionState::Failed => Err(action.state),
        })?;
        Ok(())
    }

    /// Gives a dead letter a fresh retry budget: `Failed → Pending` with
    /// `retry_count = 0`.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound`, or `InvalidTransition` if the action is not
    /// a dead letter.
    pub fn retry_dead_letter(&self, action_id: &ActionId) -> CoreResult<()> {
        self.transition(action_id, "retry", |action| match action.state {
            ActionState::Failed => {
                action.state = ActionState::Pending;
                action.retry_count = 0;
                Ok(Change::Update)
            }
            ActionState::Pending | ActionState::InFlight | ActionState::Synced => {
                Err(action.state)
            }
        })?;
        info!(%action_id, "dead letter requeued");
        Ok(())
    }

    /// Removes a dead letter at the user's request, unblocking the owner's
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound`, or `InvalidTransition` if the action is not
    /// a dead letter.
    pub fn discard(&self, action_id: &ActionId) -> CoreResult<OfflineAction> {
        let action = self.transition(action_id, "discard", |action| match action.state {
            ActionState::Failed => Ok(Change::Remove),
            ActionState::Pending | ActionState::InFlight | ActionState::Synced => {
                Err(action.state)
            }
        })?;
        info!(%action_id, "dead letter discarded");
        Ok(action)
    }

    /// Returns every queued action of `owner_id` in delivery order.
    /// Unreadable rows are dropped and logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn actions(&self, owner_id: &str) -> CoreResult<Vec<OfflineAction>> {
        let records = self.store.query(ACTION_TABLE, OWNER_INDEX, owner_id)?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            match rows::decode::<OfflineAction>(&record.value) {
                Ok(action) => out.push(action),
                Err(e) => self.drop_unreadable(&record.key, &e.to_string()),
            }
        }
        // Keys already sort by sequence; this keeps the guarantee explicit
        out.sort_by_key(|a| a.action_id.sequence);
        Ok(out)
    }

    /// Returns the deliverable (`Pending` or `InFlight`) actions of
    /// `owner_id` in delivery order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn pending(&self, owner_id: &str) -> CoreResult<Vec<OfflineAction>> {
        Ok(self
            .actions(owner_id)?
            .into_iter()
            .filter(|a| a.state.is_deliverable())
            .collect())
    }

    /// Returns the dead letters of `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn dead_letters(&self, owner_id: &str) -> CoreResult<Vec<OfflineAction>> {
        Ok(self
            .actions(owner_id)?
            .into_iter()
            .filter(|a| a.state == ActionState::Failed)
            .collect())
    }

    /// Returns the number of non-synced actions of `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn depth(&self, owner_id: &str) -> CoreResult<usize> {
        Ok(self.store.query(ACTION_TABLE, OWNER_INDEX, owner_id)?.len())
    }

    /// Returns every owner with at least one queued action.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn owners(&self) -> CoreResult<Vec<String>> {
        let owners: BTreeSet<String> = self
            .store
            .scan(ACTION_TABLE)?
            .into_iter()
            .filter_map(|r| r.index(OWNER_INDEX).map(str::to_string))
            .collect();
        Ok(owners.into_iter().collect())
    }

    /// Loads, edits and writes back one action under the write lock.
    fn transition<F>(
        &self,
        action_id: &ActionId,
        operation: &'static str,
        edit: F,
    ) -> CoreResult<OfflineAction>
    where
        F: FnOnce(&mut OfflineAction) -> Result<Change, ActionState>,
    {
        let action = {
            let _guard = self.write_lock.lock();
            let mut action = self
                .get(action_id)?
                .ok_or_else(|| CoreError::action_not_found(action_id))?;

            let change = edit(&mut action).map_err(|from| CoreError::InvalidTransition {
                action_id: action_id.to_string(),
                from,
                operation,
            })?;
            match change {
                Change::Update => self.store.put(ACTION_TABLE, to_record(&action)?)?,
                Change::Remove => self
                    .store
                    .delete(ACTION_TABLE, &rows::action_key(action_id))?,
                Change::Unchanged => {}
            }
            self.notify(&action_id.owner_id);
            action
        };
        Ok(action)
    }

    /// Reports the live depth. Callers hold the write lock, so depths reach
    /// the listener in mutation order.
    fn notify(&self, owner_id: &str) {
        let Some(listener) = self.listener.read().clone() else {
            return;
        };
        match self.depth(owner_id) {
            Ok(depth) => listener.depth_changed(owner_id, depth),
            Err(e) => warn!(owner_id, error = %e, "could not read queue depth"),
        }
    }

    fn drop_unreadable(&self, key: &str, reason: &str) {
        warn!(key, reason, "dropping unreadable action row");
        if let Err(e) = self.store.delete(ACTION_TABLE, key) {
            warn!(key, error = %e, "failed to drop unreadable action row");
        }
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("config", &self.config)
            .field("durable", &self.store.is_durable())
            .finish()
    }
}

enum Change {
    Update,
    Remove,
    Unchanged,
}

fn to_record(action: &OfflineAction) -> CoreResult<Record> {
    Ok(
        Record::new(rows::action_key(&action.action_id), rows::encode(action)?)
            .with_index(OWNER_INDEX, action.owner_id.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, Timestamp};
    use std::collections::HashMap;
    use studycache_storage::MemoryStore;

    fn open(max_retries: u32) -> (ActionQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(5_000)));
        let queue = ActionQueue::open(
            store.clone(),
            clock,
            QueueConfig::default().with_max_retries(max_retries),
        )
        .unwrap();
        (queue, store)
    }

    #[derive(Default)]
    struct Depths(parking_lot::Mutex<HashMap<String, usize>>);

    impl DepthListener for Depths {
        fn depth_changed(&self, owner_id: &str, depth: usize) {
            self.0.lock().insert(owner_id.to_string(), depth);
        }
    }

    #[test]
    fn enqueue_assigns_increasing_ids_per_owner() {
        let (queue, _) = open(5);
        let a1 = queue.enqueue("u1", "submit_answer", vec![1]).unwrap();
        let b1 = queue.enqueue("u2", "submit_answer", vec![2]).unwrap();
        let a2 = queue.enqueue("u1", "complete_session", vec![3]).unwrap();

        assert_eq!(a1, ActionId::new("u1", 1));
        assert_eq!(a2, ActionId::new("u1", 2));
        assert_eq!(b1, ActionId::new("u2", 1));

        let stored = queue.get(&a1).unwrap().unwrap();
        assert_eq!(stored.state, ActionState::Pending);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.queued_at, Timestamp::from_millis(5_000));
    }

    #[test]
    fn empty_owner_is_rejected() {
        let (queue, _) = open(5);
        let err = queue.enqueue("", "submit_answer", vec![]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn delivery_is_fifo() {
        let (queue, _) = open(5);
        let first = queue.enqueue("u1", "a", vec![]).unwrap();
        let second = queue.enqueue("u1", "b", vec![]).unwrap();

        assert_eq!(queue.next_for_delivery("u1").unwrap().unwrap().action_id, first);
        queue.mark_in_flight(&first).unwrap();
        queue.mark_synced(&first).unwrap();
        assert_eq!(queue.next_for_delivery("u1").unwrap().unwrap().action_id, second);
        queue.mark_synced(&second).unwrap();
        assert!(queue.next_for_delivery("u1").unwrap().is_none());
        assert_eq!(queue.depth("u1").unwrap(), 0);
    }

    #[test]
    fn failure_keeps_action_at_head() {
        let (queue, _) = open(5);
        let first = queue.enqueue("u1", "a", vec![]).unwrap();
        queue.enqueue("u1", "b", vec![]).unwrap();

        queue.mark_in_flight(&first).unwrap();
        let outcome = queue.mark_failed(&first, "timeout").unwrap();
        assert_eq!(outcome, FailureOutcome::Retry { retry_count: 1 });

        let head = queue.next_for_delivery("u1").unwrap().unwrap();
        assert_eq!(head.action_id, first);
        assert_eq!(head.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn exceeding_max_retries_makes_dead_letter() {
        let (queue, _) = open(2);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        let later = queue.enqueue("u1", "b", vec![]).unwrap();

        assert_eq!(
            queue.mark_failed(&id, "e1").unwrap(),
            FailureOutcome::Retry { retry_count: 1 }
        );
        assert_eq!(
            queue.mark_failed(&id, "e2").unwrap(),
            FailureOutcome::Retry { retry_count: 2 }
        );
        assert_eq!(queue.mark_failed(&id, "e3").unwrap(), FailureOutcome::Exhausted);

        // Dead letter stays and blocks the later action
        assert!(queue.next_for_delivery("u1").unwrap().is_none());
        assert_eq!(queue.blocking_action("u1").unwrap().unwrap().action_id, id);
        assert_eq!(queue.get(&later).unwrap().unwrap().state, ActionState::Pending);
        assert_eq!(queue.dead_letters("u1").unwrap().len(), 1);
        assert_eq!(queue.pending("u1").unwrap().len(), 1);
        assert_eq!(queue.depth("u1").unwrap(), 2);
    }

    #[test]
    fn dead_letter_blocks_only_its_owner() {
        let (queue, _) = open(5);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        let other = queue.enqueue("u2", "a", vec![]).unwrap();
        queue.mark_rejected(&id, "invalid session").unwrap();

        assert!(queue.next_for_delivery("u1").unwrap().is_none());
        assert_eq!(queue.next_for_delivery("u2").unwrap().unwrap().action_id, other);
    }

    #[test]
    fn dead_letter_transitions() {
        let (queue, _) = open(5);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        queue.mark_rejected(&id, "bad").unwrap();

        for result in [
            queue.mark_in_flight(&id).map(|_| ()),
            queue.mark_synced(&id).map(|_| ()),
            queue.mark_failed(&id, "x").map(|_| ()),
            queue.release(&id),
        ] {
            assert!(matches!(
                result,
                Err(CoreError::InvalidTransition {
                    from: ActionState::Failed,
                    ..
                })
            ));
        }

        queue.retry_dead_letter(&id).unwrap();
        let action = queue.get(&id).unwrap().unwrap();
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.retry_count, 0);
        assert_eq!(queue.next_for_delivery("u1").unwrap().unwrap().action_id, id);
    }

    #[test]
    fn discard_only_applies_to_dead_letters() {
        let (queue, _) = open(5);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        let next = queue.enqueue("u1", "b", vec![]).unwrap();

        assert!(matches!(
            queue.discard(&id),
            Err(CoreError::InvalidTransition { .. })
        ));
        queue.mark_rejected(&id, "bad").unwrap();
        queue.discard(&id).unwrap();

        assert!(queue.get(&id).unwrap().is_none());
        assert_eq!(queue.next_for_delivery("u1").unwrap().unwrap().action_id, next);
    }

    #[test]
    fn unknown_action_is_not_found() {
        let (queue, _) = open(5);
        let err = queue.mark_synced(&ActionId::new("u1", 9)).unwrap_err();
        assert!(matches!(err, CoreError::ActionNotFound { .. }));
    }

    #[test]
    fn release_does_not_count_as_failure() {
        let (queue, _) = open(5);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        queue.mark_in_flight(&id).unwrap();
        queue.release(&id).unwrap();

        let action = queue.get(&id).unwrap().unwrap();
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.retry_count, 0);
    }

    #[test]
    fn reopen_recovers_in_flight_actions() {
        let (queue, store) = open(5);
        let id = queue.enqueue("u1", "a", vec![7]).unwrap();
        queue.mark_in_flight(&id).unwrap();
        drop(queue);

        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(9_000)));
        let queue = ActionQueue::open(store, clock, QueueConfig::default()).unwrap();
        let action = queue.get(&id).unwrap().unwrap();
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.retry_count, 0);
        assert_eq!(action.payload, vec![7]);

        // Sequence continues after reopen
        assert_eq!(queue.enqueue("u1", "b", vec![]).unwrap(), ActionId::new("u1", 2));
    }

    #[test]
    fn sequence_is_not_reused_after_ack() {
        let (queue, _) = open(5);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        queue.mark_synced(&id).unwrap();
        assert_eq!(queue.enqueue("u1", "b", vec![]).unwrap(), ActionId::new("u1", 2));
    }

    #[test]
    fn listener_sees_live_depth() {
        let (queue, _) = open(5);
        let depths = Arc::new(Depths::default());
        queue.set_listener(depths.clone());

        let a = queue.enqueue("u1", "a", vec![]).unwrap();
        queue.enqueue("u1", "b", vec![]).unwrap();
        assert_eq!(depths.0.lock().get("u1"), Some(&2));

        queue.mark_synced(&a).unwrap();
        assert_eq!(depths.0.lock().get("u1"), Some(&1));
    }

    #[test]
    fn owners_lists_each_owner_once() {
        let (queue, _) = open(5);
        queue.enqueue("u2", "a", vec![]).unwrap();
        queue.enqueue("u1", "a", vec![]).unwrap();
        queue.enqueue("u2", "b", vec![]).unwrap();
        assert_eq!(queue.owners().unwrap(), vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn unreadable_rows_are_dropped() {
        let (queue, store) = open(5);
        let id = queue.enqueue("u1", "a", vec![]).unwrap();
        store
            .put(
                ACTION_TABLE,
                Record::new(rows::action_key(&ActionId::new("u1", 50)), vec![0xff])
                    .with_index(OWNER_INDEX, "u1"),
            )
            .unwrap();

        let actions = queue.actions("u1").unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_id, id);
        assert_eq!(queue.depth("u1").unwrap(), 1);
    }
}
