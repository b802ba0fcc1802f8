//! Queue dump command implementation.

use super::{open_queue, open_store, CommandResult};
use serde::Serialize;
use std::path::Path;
use studycache_core::{ActionState, OfflineAction};

/// One queued action, as shown by the dump.
#[derive(Debug, Serialize)]
pub struct ActionRow {
    /// Per-owner sequence number.
    pub sequence: u64,
    /// Mutation kind.
    pub action_type: String,
    /// Delivery state.
    pub state: String,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Enqueue time, in milliseconds since the epoch.
    pub queued_at: u64,
    /// Affected artifact type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Payload size in bytes.
    pub payload_len: usize,
    /// Latest failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&OfflineAction> for ActionRow {
    fn from(action: &OfflineAction) -> Self {
        Self {
            sequence: action.action_id.sequence,
            action_type: action.action_type.clone(),
            state: state_name(action.state).to_string(),
            retry_count: action.retry_count,
            queued_at: action.queued_at.as_millis(),
            target: action.target.map(|t| t.to_string()),
            payload_len: action.payload.len(),
            last_error: action.last_error.clone(),
        }
    }
}

fn state_name(state: ActionState) -> &'static str {
    match state {
        ActionState::Pending => "pending",
        ActionState::InFlight => "in-flight",
        ActionState::Synced => "synced",
        ActionState::Failed => "failed",
    }
}

/// Prints the queued actions of one owner in delivery order.
pub fn run(path: &Path, owner: &str, format: &str) -> CommandResult<()> {
    let rows = collect(path, owner)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => print_text_output(owner, &rows),
    }
    Ok(())
}

/// Loads the queued actions of `owner`.
pub fn collect(path: &Path, owner: &str) -> CommandResult<Vec<ActionRow>> {
    let queue = open_queue(open_store(path)?)?;
    Ok(queue.actions(owner)?.iter().map(ActionRow::from).collect())
}

fn print_text_output(owner: &str, rows: &[ActionRow]) {
    if rows.is_empty() {
        println!("No queued actions for {owner}");
        return;
    }
    println!("Queue of {owner} ({} actions)", rows.len());
    println!();
    println!(
        "{:>8}  {:<10}  {:>7}  {:<20}  {:<10}  {:>8}",
        "seq", "state", "retries", "type", "target", "bytes"
    );
    for row in rows {
        println!(
            "{:>8}  {:<10}  {:>7}  {:<20}  {:<10}  {:>8}",
            row.sequence,
            row.state,
            row.retry_count,
            row.action_type,
            row.target.as_deref().unwrap_or("-"),
            row.payload_len
        );
        if let Some(error) = &row.last_error {
            println!("          error: {error}");
        }
    }
}
