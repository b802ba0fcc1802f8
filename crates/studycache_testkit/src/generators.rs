//! Property-based test generators using proptest.

use proptest::prelude::*;
use studycache_core::{ArtifactType, NewArtifact, Snapshot, SnapshotItem};
use studycache_sync_engine::BackendError;

/// Strategy for generating owner ids.
pub fn owner_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}").expect("Invalid regex")
}

/// Strategy for generating artifact types.
pub fn artifact_type_strategy() -> impl Strategy<Value = ArtifactType> {
    prop::sample::select(ArtifactType::ALL.to_vec())
}

/// Strategy for generating artifact ids from a small pool, so collisions
/// are common.
pub fn artifact_id_strategy() -> impl Strategy<Value = String> {
    (0u8..12).prop_map(|n| format!("a{n}"))
}

/// Strategy for generating opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating artifacts of one owner.
pub fn new_artifact_strategy(owner_id: String) -> impl Strategy<Value = NewArtifact> {
    (
        artifact_type_strategy(),
        artifact_id_strategy(),
        payload_strategy(),
        any::<bool>(),
    )
        .prop_map(move |(artifact_type, artifact_id, payload, materialized)| {
            NewArtifact::new(owner_id.clone(), artifact_type, artifact_id, payload)
                .materialized(materialized)
        })
}

/// Strategy for generating snapshot items. Ids repeat often.
pub fn snapshot_item_strategy() -> impl Strategy<Value = SnapshotItem> {
    (artifact_id_strategy(), payload_strategy(), any::<bool>()).prop_map(
        |(artifact_id, payload, has_resources)| {
            SnapshotItem::new(artifact_id, payload).with_resources(has_resources)
        },
    )
}

/// Strategy for generating a snapshot of `artifact_type`.
pub fn snapshot_strategy(artifact_type: ArtifactType) -> impl Strategy<Value = Snapshot> {
    prop::collection::vec(snapshot_item_strategy(), 0..20)
        .prop_map(move |items| Snapshot::new(artifact_type, items))
}

/// One scripted delivery outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The backend acknowledges the action.
    Ack,
    /// The backend fails transiently.
    Transient,
    /// The backend rejects the action.
    Rejected,
}

impl DeliveryOutcome {
    /// Converts to the scripted backend result.
    pub fn into_result(self) -> Result<(), BackendError> {
        match self {
            DeliveryOutcome::Ack => Ok(()),
            DeliveryOutcome::Transient => Err(BackendError::Transient("unavailable".into())),
            DeliveryOutcome::Rejected => Err(BackendError::Rejected("invalid".into())),
        }
    }
}

/// Strategy for generating delivery outcomes, mostly acknowledgements.
pub fn delivery_outcome_strategy() -> impl Strategy<Value = DeliveryOutcome> {
    prop_oneof![
        6 => Just(DeliveryOutcome::Ack),
        3 => Just(DeliveryOutcome::Transient),
        1 => Just(DeliveryOutcome::Rejected),
    ]
}
