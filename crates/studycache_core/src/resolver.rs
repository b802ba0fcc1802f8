//! Server-authoritative reconciliation of pulled snapshots.
//!
//! The server wins for every artifact it returns. Local actions that are
//! still queued are assumed to show up in a later pull once delivered, so they
//! never override pulled content; they are only reported so the caller knows
//! the snapshot may not reflect them yet.

use crate::model::{ActionId, ActionState, ArtifactType, CachedArtifact, NewArtifact, OfflineAction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use studycache_storage::codec;

/// One artifact as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotItem {
    /// Artifact id, unique within owner and type.
    pub artifact_id: String,
    /// Opaque payload.
    #[serde(with = "codec::bytes")]
    pub payload: Vec<u8>,
    /// Whether the payload references nested binary resources (images) that
    /// must be fetched separately before the artifact is fully materialized.
    #[serde(default)]
    pub has_resources: bool,
}

impl SnapshotItem {
    /// Creates an item without nested resources.
    pub fn new(artifact_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            payload,
            has_resources: false,
        }
    }

    /// Marks whether the item references nested resources.
    #[must_use]
    pub fn with_resources(mut self, has_resources: bool) -> Self {
        self.has_resources = has_resources;
        self
    }
}

/// Server state of one artifact type for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The type every item belongs to.
    pub artifact_type: ArtifactType,
    /// Items, in server order.
    pub items: Vec<SnapshotItem>,
}

impl Snapshot {
    /// Creates a snapshot.
    pub fn new(artifact_type: ArtifactType, items: Vec<SnapshotItem>) -> Self {
        Self {
            artifact_type,
            items,
        }
    }
}

/// Result of [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Artifacts to write into the cache, one per distinct snapshot id.
    pub artifacts: Vec<NewArtifact>,
    /// Queued actions targeting this type that the backend has not yet
    /// acknowledged.
    pub awaiting_ack: Vec<ActionId>,
    /// How many resolved artifacts are identical to what is cached.
    pub unchanged: usize,
}

/// Reconciles `snapshot` with the owner's cached artifacts and still-queued
/// actions.
///
/// # Invariants
///
/// - Every distinct snapshot id yields exactly one artifact carrying the
///   server payload; a repeated id resolves to its last occurrence.
/// - Pending actions never change the resolved content.
/// - Cached artifacts missing from the snapshot are not touched.
pub fn resolve(
    owner_id: &str,
    snapshot: &Snapshot,
    cached: &[CachedArtifact],
    pending: &[OfflineAction],
) -> Resolution {
    let artifact_type = snapshot.artifact_type;
    let cached: HashMap<&str, &CachedArtifact> = cached
        .iter()
        .filter(|a| a.owner_id == owner_id && a.artifact_type == artifact_type)
        .map(|a| (a.artifact_id.as_str(), a))
        .collect();

    // Last occurrence wins; keep first-seen order for determinism
    let mut order: Vec<&str> = Vec::with_capacity(snapshot.items.len());
    let mut latest: BTreeMap<&str, &SnapshotItem> = BTreeMap::new();
    for item in &snapshot.items {
        if latest.insert(item.artifact_id.as_str(), item).is_none() {
            order.push(item.artifact_id.as_str());
        }
    }

    let mut resolution = Resolution::default();
    for id in order {
        let Some(item) = latest.get(id) else {
            continue;
        };
        let previous = cached.get(id);
        let same_payload = previous.is_some_and(|c| c.payload == item.payload);
        let materialized = match previous {
            Some(c) if same_payload && c.is_fully_materialized => true,
            _ => !item.has_resources,
        };
        if same_payload && previous.is_some_and(|c| c.is_fully_materialized == materialized) {
            resolution.unchanged += 1;
        }
        resolution.artifacts.push(
            NewArtifact::new(owner_id, artifact_type, id, item.payload.clone())
                .materialized(materialized),
        );
    }

    resolution.awaiting_ack = pending
        .iter()
        .filter(|a| a.owner_id == owner_id && a.target == Some(artifact_type))
        .filter(|a| a.state != ActionState::Synced)
        .map(|a| a.action_id.clone())
        .collect();

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;

    fn cached(id: &str, payload: &[u8], materialized: bool) -> CachedArtifact {
        CachedArtifact {
            artifact_type: ArtifactType::Quiz,
            artifact_id: id.to_string(),
            owner_id: "u1".to_string(),
            payload: payload.to_vec(),
            cached_at: Timestamp::from_millis(1),
            expires_at: Timestamp::from_millis(10),
            last_accessed_at: Timestamp::from_millis(1),
            is_fully_materialized: materialized,
        }
    }

    fn action(seq: u64, target: Option<ArtifactType>, state: ActionState) -> OfflineAction {
        OfflineAction {
            action_id: ActionId::new("u1", seq),
            owner_id: "u1".to_string(),
            action_type: "submit_answer".to_string(),
            target,
            payload: vec![seq as u8],
            queued_at: Timestamp::from_millis(1),
            retry_count: 0,
            state,
            last_error: None,
        }
    }

    #[test]
    fn server_payload_wins() {
        let snapshot = Snapshot::new(
            ArtifactType::Quiz,
            vec![SnapshotItem::new("q1", b"server".to_vec())],
        );
        let local = [cached("q1", b"local", true)];
        let pending = [action(1, Some(ArtifactType::Quiz), ActionState::Pending)];

        let resolution = resolve("u1", &snapshot, &local, &pending);
        assert_eq!(resolution.artifacts.len(), 1);
        assert_eq!(resolution.artifacts[0].payload, b"server".to_vec());
        assert_eq!(resolution.awaiting_ack, vec![ActionId::new("u1", 1)]);
        assert_eq!(resolution.unchanged, 0);
    }

    #[test]
    fn materialized_flag_carries_over_only_for_identical_payload() {
        let snapshot = Snapshot::new(
            ArtifactType::Quiz,
            vec![
                SnapshotItem::new("same", b"a".to_vec()).with_resources(true),
                SnapshotItem::new("changed", b"new".to_vec()).with_resources(true),
                SnapshotItem::new("fresh", b"x".to_vec()).with_resources(true),
                SnapshotItem::new("plain", b"p".to_vec()),
            ],
        );
        let local = [cached("same", b"a", true), cached("changed", b"old", true)];

        let resolution = resolve("u1", &snapshot, &local, &[]);
        let flags: Vec<(&str, bool)> = resolution
            .artifacts
            .iter()
            .map(|a| (a.artifact_id.as_str(), a.is_fully_materialized))
            .collect();
        assert_eq!(
            flags,
            vec![("same", true), ("changed", false), ("fresh", false), ("plain", true)]
        );
        assert_eq!(resolution.unchanged, 1);
    }

    #[test]
    fn duplicate_ids_keep_last_occurrence() {
        let snapshot = Snapshot::new(
            ArtifactType::Quiz,
            vec![
                SnapshotItem::new("q1", b"first".to_vec()),
                SnapshotItem::new("q2", b"other".to_vec()),
                SnapshotItem::new("q1", b"second".to_vec()),
            ],
        );
        let resolution = resolve("u1", &snapshot, &[], &[]);
        assert_eq!(resolution.artifacts.len(), 2);
        assert_eq!(resolution.artifacts[0].artifact_id, "q1");
        assert_eq!(resolution.artifacts[0].payload, b"second".to_vec());
        assert_eq!(resolution.artifacts[1].artifact_id, "q2");
    }

    #[test]
    fn only_actions_targeting_the_type_are_reported() {
        let snapshot = Snapshot::new(ArtifactType::Quiz, vec![]);
        let pending = [
            action(1, Some(ArtifactType::Quiz), ActionState::InFlight),
            action(2, Some(ArtifactType::Solution), ActionState::Pending),
            action(3, None, ActionState::Pending),
            action(4, Some(ArtifactType::Quiz), ActionState::Failed),
        ];
        let resolution = resolve("u1", &snapshot, &[], &pending);
        assert_eq!(
            resolution.awaiting_ack,
            vec![ActionId::new("u1", 1), ActionId::new("u1", 4)]
        );
        assert!(resolution.artifacts.is_empty());
    }

    #[test]
    fn resolve_is_deterministic() {
        let snapshot = Snapshot::new(
            ArtifactType::Quiz,
            vec![SnapshotItem::new("b", vec![2]), SnapshotItem::new("a", vec![1])],
        );
        let local = [cached("a", &[1], false)];
        assert_eq!(
            resolve("u1", &snapshot, &local, &[]),
            resolve("u1", &snapshot, &local, &[])
        );
    }
}
