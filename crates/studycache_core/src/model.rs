//! Data model shared by the cache, the queue and the sync engine.

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use studycache_storage::codec;

/// Kind of server-derived content kept for offline viewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactType {
    /// A solved-problem record.
    Solution,
    /// A quiz snapshot.
    Quiz,
    /// An analytics summary.
    Analytics,
}

impl ArtifactType {
    /// Every artifact type, in pull order.
    pub const ALL: [ArtifactType; 3] = [
        ArtifactType::Solution,
        ArtifactType::Quiz,
        ArtifactType::Analytics,
    ];

    /// Returns the stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Solution => "solution",
            ArtifactType::Quiz => "quiz",
            ArtifactType::Analytics => "analytics",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solution" => Ok(ArtifactType::Solution),
            "quiz" => Ok(ArtifactType::Quiz),
            "analytics" => Ok(ArtifactType::Analytics),
            other => Err(format!("unknown artifact type: {other}")),
        }
    }
}

/// An artifact about to be written to the cache.
///
/// Timestamps are assigned by the cache on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    /// Owning user.
    pub owner_id: String,
    /// Artifact kind.
    pub artifact_type: ArtifactType,
    /// Id, unique within `(owner_id, artifact_type)`.
    pub artifact_id: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Whether every nested resource referenced by the payload is local.
    pub is_fully_materialized: bool,
}

impl NewArtifact {
    /// Creates a fully materialized artifact.
    pub fn new(
        owner_id: impl Into<String>,
        artifact_type: ArtifactType,
        artifact_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            artifact_type,
            artifact_id: artifact_id.into(),
            payload,
            is_fully_materialized: true,
        }
    }

    /// Sets the materialization flag.
    #[must_use]
    pub fn materialized(mut self, materialized: bool) -> Self {
        self.is_fully_materialized = materialized;
        self
    }
}

/// One cached unit of server-derived content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    /// Artifact kind.
    pub artifact_type: ArtifactType,
    /// Id, unique within `(owner_id, artifact_type)`.
    pub artifact_id: String,
    /// Owning user.
    pub owner_id: String,
    /// Opaque payload; never inspected by the engine.
    #[serde(with = "codec::bytes")]
    pub payload: Vec<u8>,
    /// When the row was first cached.
    pub cached_at: Timestamp,
    /// When the row stops being served.
    pub expires_at: Timestamp,
    /// Last read (or creation) time, used for LRU eviction.
    pub last_accessed_at: Timestamp,
    /// Whether every nested resource referenced by the payload is local.
    pub is_fully_materialized: bool,
}

impl CachedArtifact {
    /// Returns true if the artifact is stale at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Identifies a queued action: the owner plus a per-owner sequence number.
///
/// Sequences are assigned at enqueue time and increase monotonically per
/// owner, so ordering ids of one owner orders actions by enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId {
    /// Owning user.
    pub owner_id: String,
    /// Per-owner sequence number, starting at 1.
    pub sequence: u64,
}

impl ActionId {
    /// Creates an action id.
    pub fn new(owner_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            owner_id: owner_id.into(),
            sequence,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner_id, self.sequence)
    }
}

impl FromStr for ActionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, seq) = s
            .rsplit_once('#')
            .ok_or_else(|| format!("malformed action id: {s}"))?;
        let sequence = seq
            .parse()
            .map_err(|_| format!("malformed action sequence: {s}"))?;
        if owner.is_empty() {
            return Err(format!("action id without owner: {s}"));
        }
        Ok(Self::new(owner, sequence))
    }
}

/// Delivery state of an offline action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionState {
    /// Waiting for delivery (possibly after earlier failed attempts).
    Pending,
    /// Handed to the backend; outcome not yet known.
    InFlight,
    /// Acknowledged by the backend. Rows never persist in this state.
    Synced,
    /// Terminal: retries exhausted or rejected. Retained for diagnostics and
    /// blocks later actions of the same owner.
    Failed,
}

impl ActionState {
    /// Returns true if the delivery loop may pick this action up.
    #[must_use]
    pub fn is_deliverable(self) -> bool {
        match self {
            ActionState::Pending | ActionState::InFlight => true,
            ActionState::Synced | ActionState::Failed => false,
        }
    }
}

/// A user mutation not yet confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineAction {
    /// Id, monotonic per owner.
    pub action_id: ActionId,
    /// Owning user.
    pub owner_id: String,
    /// Tag identifying the mutation kind.
    pub action_type: String,
    /// Artifact type the mutation affects, if any.
    #[serde(default)]
    pub target: Option<ArtifactType>,
    /// Opaque payload.
    #[serde(with = "codec::bytes")]
    pub payload: Vec<u8>,
    /// Enqueue time.
    pub queued_at: Timestamp,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Delivery state.
    pub state: ActionState,
    /// Reason for the latest failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Lifecycle state of a sync cycle for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// No cycle running.
    Idle,
    /// A cycle is draining the queue or pulling snapshots.
    Syncing,
    /// The last cycle finished successfully.
    Completed,
    /// The last cycle ended with an unrecoverable failure.
    Error,
}

impl SyncState {
    /// Returns true while a cycle holds the owner.
    #[must_use]
    pub fn is_active(self) -> bool {
        match self {
            SyncState::Syncing => true,
            SyncState::Idle | SyncState::Completed | SyncState::Error => false,
        }
    }
}

/// Synchronization status of one owner, as shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Owning user.
    pub owner_id: String,
    /// End of the last successful cycle.
    pub last_sync_at: Option<Timestamp>,
    /// Start of the last cycle.
    pub last_attempt_at: Option<Timestamp>,
    /// Whether a cycle has ever completed for this owner.
    pub initial_sync_complete: bool,
    /// Live count of non-synced actions.
    pub pending_count: usize,
    /// Cycle state.
    pub state: SyncState,
    /// Message of the last unrecoverable failure.
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// The status of an owner that has never synced.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            last_sync_at: None,
            last_attempt_at: None,
            initial_sync_complete: false,
            pending_count: 0,
            state: SyncState::Idle,
            last_error: None,
        }
    }
}
