//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file is corrupted beyond recovery.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A batch could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access to {0}")]
    Locked(String),

    /// A failed write could not be rolled back. The store refuses further
    /// writes until it is reopened or compacted, which drops the damaged
    /// tail.
    #[error("store failed: {0}; reopen or compact to recover")]
    Failed(String),

    /// The store has been closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a codec error from any displayable error.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
