//! Table layout and row encoding.
//!
//! Keys embed the owner id with a length prefix so that no combination of
//! owner and artifact id can collide with another.

use crate::error::{CoreError, CoreResult};
use crate::model::{ActionId, ArtifactType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use studycache_storage::codec;

/// Table holding [`crate::CachedArtifact`] rows.
pub const ARTIFACT_TABLE: &str = "artifacts";

/// Table holding [`crate::OfflineAction`] rows.
pub const ACTION_TABLE: &str = "actions";

/// Table holding the next action sequence per owner.
pub const QUEUE_META_TABLE: &str = "queue_meta";

/// Table holding one [`crate::SyncStatus`] row per owner.
pub const SYNC_STATUS_TABLE: &str = "sync_status";

/// Index over owner id.
pub(crate) const OWNER_INDEX: &str = "owner";

/// Index over owner id and artifact type.
pub(crate) const OWNER_TYPE_INDEX: &str = "owner_type";

fn owner_prefix(owner_id: &str) -> String {
    format!("{}:{}", owner_id.len(), owner_id)
}

pub(crate) fn artifact_key(owner_id: &str, artifact_type: ArtifactType, artifact_id: &str) -> String {
    format!("{}/{}/{}", owner_prefix(owner_id), artifact_type, artifact_id)
}

pub(crate) fn owner_type_value(owner_id: &str, artifact_type: ArtifactType) -> String {
    format!("{}/{}", owner_prefix(owner_id), artifact_type)
}

/// Zero-padded so that key order equals sequence order.
pub(crate) fn action_key(id: &ActionId) -> String {
    format!("{}#{:020}", owner_prefix(&id.owner_id), id.sequence)
}

pub(crate) fn encode<T: Serialize>(row: &T) -> CoreResult<Vec<u8>> {
    codec::to_cbor(row).map_err(|e| CoreError::Codec(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    codec::from_cbor(bytes).map_err(|e| CoreError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_keys_do_not_collide() {
        let a = artifact_key("a/quiz", ArtifactType::Quiz, "x");
        let b = artifact_key("a", ArtifactType::Quiz, "quiz/quiz/x");
        assert_ne!(a, b);
    }

    #[test]
    fn action_keys_sort_by_sequence() {
        let k2 = action_key(&ActionId::new("u", 2));
        let k10 = action_key(&ActionId::new("u", 10));
        assert!(k2 < k10);
    }

    #[test]
    fn decode_garbage_is_codec_error() {
        let result: CoreResult<ActionId> = decode(&[0xff, 0xff]);
        assert!(matches!(result, Err(CoreError::Codec(_))));
    }
}
