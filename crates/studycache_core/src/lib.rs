//! # studycache core
//!
//! The local half of the offline engine: what is cached, what is queued, and
//! how a fresh server snapshot is reconciled with local state.
//!
//! This crate provides:
//! - The data model ([`CachedArtifact`], [`OfflineAction`], [`SyncStatus`])
//! - [`CacheStore`]: TTL expiry and per-owner, per-type LRU capacity eviction
//! - [`ActionQueue`]: durable, strictly FIFO per owner, dead-letter retention
//! - [`resolve`]: the server-authoritative conflict resolver
//! - [`Clock`] so expiry can be driven deterministically in tests
//!
//! Nothing here touches the network; the sync engine drives these types.
//!
//! ## Key Invariants
//!
//! - `expires_at >= cached_at` for every cached artifact
//! - Actions for an owner are delivered in enqueue order
//! - An action row is removed only on acknowledged delivery or explicit
//!   discard of a dead letter
//! - A terminally failed action blocks later actions of the same owner

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod error;
mod model;
mod queue;
mod resolver;
mod rows;

pub use cache::{CacheStats, CacheStore};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{CacheConfig, CapacityPolicy, QueueConfig, TtlPolicy};
pub use error::{CoreError, CoreResult};
pub use model::{
    ActionId, ActionState, ArtifactType, CachedArtifact, NewArtifact, OfflineAction, SyncState,
    SyncStatus,
};
pub use queue::{ActionQueue, DepthListener, FailureOutcome};
pub use resolver::{resolve, Resolution, Snapshot, SnapshotItem};
pub use rows::{ACTION_TABLE, ARTIFACT_TABLE, QUEUE_META_TABLE, SYNC_STATUS_TABLE};

/// studycache version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
