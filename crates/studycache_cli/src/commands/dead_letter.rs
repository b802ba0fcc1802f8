//! Dead-letter commands.

use super::{open_queue, open_store, CommandResult};
use std::path::Path;
use studycache_core::ActionId;

/// Returns a failed action to the queue with a fresh retry budget.
pub fn retry(path: &Path, owner: &str, sequence: u64) -> CommandResult<()> {
    let queue = open_queue(open_store(path)?)?;
    let action_id = ActionId::new(owner, sequence);
    queue.retry_dead_letter(&action_id)?;
    println!("Requeued {action_id}");
    Ok(())
}

/// Drops a failed action so later actions can be delivered.
pub fn discard(path: &Path, owner: &str, sequence: u64) -> CommandResult<()> {
    let queue = open_queue(open_store(path)?)?;
    let action = queue.discard(&ActionId::new(owner, sequence))?;
    println!("Discarded {} ({})", action.action_id, action.action_type);
    Ok(())
}
