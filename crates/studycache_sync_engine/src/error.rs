//! Error types for the sync engine.

use crate::backend::BackendError;
use studycache_core::{ArtifactType, CoreError};
use studycache_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Cache or queue error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Persistent store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The backend failed in a way that may succeed later.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The backend refused the request permanently.
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// A backend call exceeded the request timeout.
    #[error("operation timed out")]
    Timeout,

    /// Connectivity was lost mid-cycle.
    #[error("sync cancelled")]
    Cancelled,

    /// A dead letter blocks the owner's queue.
    #[error("action {action_id} failed permanently: {reason}")]
    Blocked {
        /// The blocking action.
        action_id: String,
        /// Its last failure reason.
        reason: String,
    },

    /// A snapshot could not be pulled.
    #[error("pull of {artifact_type} failed: {message}")]
    Pull {
        /// The artifact type being pulled.
        artifact_type: ArtifactType,
        /// What went wrong.
        message: String,
    },
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transient(_) | SyncError::Timeout => true,
            SyncError::Core(_)
            | SyncError::Storage(_)
            | SyncError::Rejected(_)
            | SyncError::Cancelled
            | SyncError::Blocked { .. }
            | SyncError::Pull { .. } => false,
        }
    }
}

impl From<BackendError> for SyncError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transient(message) => SyncError::Transient(message),
            BackendError::Rejected(message) => SyncError::Rejected(message),
        }
    }
}
