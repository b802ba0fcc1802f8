//! CLI command implementations.

pub mod compact;
pub mod dead_letter;
pub mod inspect;
pub mod queue;
pub mod sweep;

use std::path::Path;
use std::sync::Arc;
use studycache_core::{ActionQueue, QueueConfig, SystemClock};
use studycache_storage::{FileStore, LOG_FILE};

/// Result type shared by the commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing store directory. Fails if the app still holds it.
pub fn open_store(path: &Path) -> CommandResult<Arc<FileStore>> {
    if !path.join(LOG_FILE).exists() {
        return Err(format!("No studycache store found at {}", path.display()).into());
    }
    Ok(Arc::new(FileStore::open(path)?))
}

/// Opens the action queue of a store. Opening returns interrupted
/// deliveries to the queue, as the app would on its next start.
pub fn open_queue(store: Arc<FileStore>) -> CommandResult<ActionQueue> {
    Ok(ActionQueue::open(
        store,
        Arc::new(SystemClock),
        QueueConfig::default(),
    )?)
}
