//! Records and write batches.

use crate::codec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A keyed value stored in a table.
///
/// `indexes` maps an index name to the value this record is filed under.
/// A record can be found through [`crate::PersistentStore::query`] by any of
/// its index entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key, unique within the table.
    pub key: String,
    /// Opaque value bytes.
    #[serde(with = "codec::bytes")]
    pub value: Vec<u8>,
    /// Secondary index entries (index name -> indexed value).
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
}

impl Record {
    /// Creates a record with no index entries.
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            indexes: BTreeMap::new(),
        }
    }

    /// Adds an index entry.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.indexes.insert(name.into(), value.into());
        self
    }

    /// Returns the value this record is filed under for `index`.
    pub fn index(&self, index: &str) -> Option<&str> {
        self.indexes.get(index).map(String::as_str)
    }
}

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or replace a record.
    Put {
        /// Target table.
        table: String,
        /// The record to store.
        record: Record,
    },
    /// Remove a record. Deleting a missing key is not an error.
    Delete {
        /// Target table.
        table: String,
        /// Key to remove.
        key: String,
    },
}

impl WriteOp {
    /// Returns the table this operation targets.
    pub fn table(&self) -> &str {
        match self {
            WriteOp::Put { table, .. } | WriteOp::Delete { table, .. } => table,
        }
    }
}

/// An ordered group of operations applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a put.
    #[must_use]
    pub fn put(mut self, table: impl Into<String>, record: Record) -> Self {
        self.push_put(table, record);
        self
    }

    /// Appends a delete.
    #[must_use]
    pub fn delete(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.push_delete(table, key);
        self
    }

    /// Appends a put in place.
    pub fn push_put(&mut self, table: impl Into<String>, record: Record) {
        self.ops.push(WriteOp::Put {
            table: table.into(),
            record,
        });
    }

    /// Appends a delete in place.
    pub fn push_delete(&mut self, table: impl Into<String>, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete {
            table: table.into(),
            key: key.into(),
        });
    }

    /// Returns the operations in order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consumes the batch, returning its operations.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_index_lookup() {
        let record = Record::new("k", vec![1])
            .with_index("owner", "u1")
            .with_index("kind", "quiz");
        assert_eq!(record.index("owner"), Some("u1"));
        assert_eq!(record.index("kind"), Some("quiz"));
        assert_eq!(record.index("missing"), None);
    }

    #[test]
    fn batch_preserves_order() {
        let batch = WriteBatch::new()
            .put("t", Record::new("a", vec![]))
            .delete("t", "b")
            .put("u", Record::new("c", vec![]));

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[0].table(), "t");
        assert!(matches!(batch.ops()[1], WriteOp::Delete { ref key, .. } if key == "b"));
        assert_eq!(batch.ops()[2].table(), "u");
    }
}
