//! Compact command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use studycache_storage::{CompactionStats, PersistentStore};

/// Rewrites the store log with live rows only.
pub fn run(path: &Path) -> CommandResult<()> {
    let stats = compact(path)?;
    println!("Compaction complete");
    println!("  Live rows:    {}", stats.live_rows);
    println!("  Size before:  {} bytes", stats.bytes_before);
    println!("  Size after:   {} bytes", stats.bytes_after);
    Ok(())
}

/// Compacts the store at `path`.
pub fn compact(path: &Path) -> CommandResult<CompactionStats> {
    let store = open_store(path)?;
    Ok(store.compact()?)
}
