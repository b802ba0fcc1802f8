//! Error types for studycache core.

use crate::model::ActionState;
use studycache_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in cache and queue operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Persistent store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A row could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// No action with this id is queued.
    #[error("action not found: {action_id}")]
    ActionNotFound {
        /// The action id that was looked up.
        action_id: String,
    },

    /// The requested state change is not allowed from the current state.
    #[error("cannot {operation} action {action_id} in state {from:?}")]
    InvalidTransition {
        /// The action id.
        action_id: String,
        /// Current state.
        from: ActionState,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CoreError {
    /// Creates an `ActionNotFound` error.
    pub fn action_not_found(action_id: impl ToString) -> Self {
        Self::ActionNotFound {
            action_id: action_id.to_string(),
        }
    }
}
