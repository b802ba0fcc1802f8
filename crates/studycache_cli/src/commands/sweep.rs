//! Sweep command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use std::sync::Arc;
use studycache_core::{CacheConfig, CacheStore, SystemClock};

/// Removes expired artifacts from the store.
pub fn run(path: &Path) -> CommandResult<()> {
    let removed = sweep(path)?;
    println!("Removed {removed} expired artifacts");
    Ok(())
}

/// Runs the expiry sweep and returns the number of rows removed.
pub fn sweep(path: &Path) -> CommandResult<usize> {
    let store = open_store(path)?;
    let cache = CacheStore::new(store, Arc::new(SystemClock), CacheConfig::default());
    let removed = cache.evict_expired()?;
    tracing::info!(removed, "sweep finished");
    Ok(removed)
}
