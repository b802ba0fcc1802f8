//! In-memory table state shared by every backend.

use crate::record::{Record, WriteOp};
use std::collections::{BTreeMap, BTreeSet};

/// A single table: rows by key plus secondary index postings.
#[derive(Debug, Default, Clone)]
struct Table {
    rows: BTreeMap<String, Record>,
    /// (index name, indexed value) -> keys
    postings: BTreeMap<(String, String), BTreeSet<String>>,
}

impl Table {
    /// Inserts or replaces a row. Returns true if a row was replaced.
    fn put(&mut self, record: Record) -> bool {
        let replaced = self.remove(&record.key).is_some();
        for (name, value) in &record.indexes {
            self.postings
                .entry((name.clone(), value.clone()))
                .or_default()
                .insert(record.key.clone());
        }
        self.rows.insert(record.key.clone(), record);
        replaced
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        let old = self.rows.remove(key)?;
        for (name, value) in &old.indexes {
            let posting = (name.clone(), value.clone());
            if let Some(keys) = self.postings.get_mut(&posting) {
                keys.remove(key);
                if keys.is_empty() {
                    self.postings.remove(&posting);
                }
            }
        }
        Some(old)
    }

    fn query(&self, index: &str, value: &str) -> Vec<Record> {
        self.postings
            .get(&(index.to_string(), value.to_string()))
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.rows.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// All tables of a store.
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    tables: BTreeMap<String, Table>,
}

impl Tables {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Applies operations in order. Returns how many existing rows were
    /// superseded (replaced or deleted).
    pub(crate) fn apply(&mut self, ops: &[WriteOp]) -> usize {
        let mut superseded = 0;
        for op in ops {
            match op {
                WriteOp::Put { table, record } => {
                    if self
                        .tables
                        .entry(table.clone())
                        .or_default()
                        .put(record.clone())
                    {
                        superseded += 1;
                    }
                }
                WriteOp::Delete { table, key } => {
                    let removed = self
                        .tables
                        .get_mut(table)
                        .and_then(|t| t.remove(key))
                        .is_some();
                    if removed {
                        superseded += 1;
                    }
                }
            }
        }
        superseded
    }

    pub(crate) fn get(&self, table: &str, key: &str) -> Option<Record> {
        self.tables.get(table)?.rows.get(key).cloned()
    }

    pub(crate) fn scan(&self, table: &str) -> Vec<Record> {
        self.tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn query(&self, table: &str, index: &str, value: &str) -> Vec<Record> {
        self.tables
            .get(table)
            .map(|t| t.query(index, value))
            .unwrap_or_default()
    }

    pub(crate) fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, t)| !t.rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns every live row as put operations, table by table.
    pub(crate) fn live_ops(&self) -> Vec<WriteOp> {
        self.tables
            .iter()
            .flat_map(|(name, t)| {
                t.rows.values().map(move |record| WriteOp::Put {
                    table: name.clone(),
                    record: record.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}
