//! Inspect command implementation.

use super::{open_queue, open_store, CommandResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use studycache_core::{CacheConfig, CacheStore, SyncStatus, SystemClock, SYNC_STATUS_TABLE};
use studycache_storage::{codec, PersistentStore};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Rows per table.
    pub tables: BTreeMap<String, usize>,
    /// Cached artifact counts.
    pub artifacts: ArtifactSummary,
    /// Queue and sync state per owner.
    pub owners: Vec<OwnerSummary>,
}

/// Cached artifact counts.
#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    /// Rows per artifact type.
    pub per_type: BTreeMap<String, usize>,
    /// Rows past their expiry, awaiting the sweep.
    pub expired: usize,
    /// Rows whose nested resources are not all local.
    pub not_materialized: usize,
    /// Total rows.
    pub total: usize,
}

/// Queue and sync state of one owner.
#[derive(Debug, Serialize)]
pub struct OwnerSummary {
    /// Owner id.
    pub owner_id: String,
    /// Cached artifacts.
    pub artifacts: usize,
    /// Actions not yet acknowledged.
    pub queued: usize,
    /// Actions that failed permanently.
    pub dead_letters: usize,
    /// Last recorded sync status, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncStatus>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let result = collect(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Gathers the inspection result.
pub fn collect(path: &Path) -> CommandResult<InspectResult> {
    let store = open_store(path)?;

    let mut tables = BTreeMap::new();
    for table in store.tables()? {
        let rows = store.len(&table)?;
        tables.insert(table, rows);
    }

    let cache = CacheStore::new(store.clone(), Arc::new(SystemClock), CacheConfig::default());
    let stats = cache.stats()?;
    let artifacts = ArtifactSummary {
        per_type: stats
            .per_type
            .iter()
            .map(|(t, n)| (t.to_string(), *n))
            .collect(),
        expired: stats.expired,
        not_materialized: stats.not_materialized,
        total: stats.total,
    };

    let statuses: BTreeMap<String, SyncStatus> = store
        .scan(SYNC_STATUS_TABLE)?
        .into_iter()
        .filter_map(|r| codec::from_cbor::<SyncStatus>(&r.value).ok().map(|s| (r.key, s)))
        .collect();

    let log_size = store.log_size();
    let queue = open_queue(store)?;
    let mut owner_ids: BTreeSet<String> = queue.owners()?.into_iter().collect();
    owner_ids.extend(statuses.keys().cloned());
    owner_ids.extend(stats.per_owner.keys().cloned());

    let mut owners = Vec::with_capacity(owner_ids.len());
    for owner_id in owner_ids {
        owners.push(OwnerSummary {
            artifacts: stats.per_owner.get(&owner_id).copied().unwrap_or(0),
            queued: queue.depth(&owner_id)?,
            dead_letters: queue.dead_letters(&owner_id)?.len(),
            status: statuses.get(&owner_id).cloned(),
            owner_id,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        log_size,
        tables,
        artifacts,
        owners,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("studycache Store Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!("Log size: {}", format_size(result.log_size));
    println!();
    println!("Tables:");
    for (name, rows) in &result.tables {
        println!("  {name:<12} {rows} rows");
    }
    println!();
    println!("Artifacts:");
    for (artifact_type, count) in &result.artifacts.per_type {
        println!("  {artifact_type:<12} {count}");
    }
    println!("  Expired:           {}", result.artifacts.expired);
    println!("  Not materialized:  {}", result.artifacts.not_materialized);
    println!("  Total:             {}", result.artifacts.total);

    if !result.owners.is_empty() {
        println!();
        println!("Owners:");
        for owner in &result.owners {
            let state = owner
                .status
                .as_ref()
                .map_or_else(|| "never synced".to_string(), |s| format!("{:?}", s.state));
            println!(
                "  {}: {} artifacts, {} queued, {} dead letters, {}",
                owner.owner_id, owner.artifacts, owner.queued, owner.dead_letters, state
            );
            if let Some(error) = owner.status.as_ref().and_then(|s| s.last_error.as_ref()) {
                println!("    last error: {error}");
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
