//! Behaviour every backend must share.

use proptest::prelude::*;
use std::collections::BTreeMap;
use studycache_storage::{FileStore, MemoryStore, PersistentStore, Record, WriteBatch};
use tempfile::tempdir;

fn exercise(store: &dyn PersistentStore) {
    store
        .commit(
            WriteBatch::new()
                .put("cache", Record::new("u1/a", b"a".to_vec()).with_index("owner", "u1"))
                .put("cache", Record::new("u1/b", b"b".to_vec()).with_index("owner", "u1"))
                .put("cache", Record::new("u2/a", b"c".to_vec()).with_index("owner", "u2"))
                .put("queue", Record::new("u1#1", b"q".to_vec()).with_index("owner", "u1")),
        )
        .unwrap();

    assert_eq!(store.len("cache").unwrap(), 3);
    assert_eq!(store.query("cache", "owner", "u1").unwrap().len(), 2);
    assert_eq!(store.query("queue", "owner", "u1").unwrap().len(), 1);
    assert!(store.query("queue", "owner", "u2").unwrap().is_empty());

    store.delete("cache", "u1/a").unwrap();
    assert_eq!(store.query("cache", "owner", "u1").unwrap().len(), 1);

    let mut tables = store.tables().unwrap();
    tables.sort();
    assert_eq!(tables, vec!["cache", "queue"]);
}

#[test]
fn memory_store_contract() {
    exercise(&MemoryStore::new());
}

#[test]
fn file_store_contract() {
    let dir = tempdir().unwrap();
    exercise(&FileStore::open(dir.path()).unwrap());
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u8, u8),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, 0u8..3, any::<u8>()).prop_map(|(k, o, v)| Op::Put(k, o, v)),
        (0u8..8).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A reopened file store matches a model map after any op sequence.
    #[test]
    fn file_store_replay_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = tempdir().unwrap();
        let mut model: BTreeMap<String, (String, Vec<u8>)> = BTreeMap::new();
        {
            let store = FileStore::open(dir.path()).unwrap();
            for op in &ops {
                match op {
                    Op::Put(k, o, v) => {
                        let key = format!("k{k}");
                        let owner = format!("o{o}");
                        store.put("t", Record::new(key.clone(), vec![*v]).with_index("owner", owner.clone())).unwrap();
                        model.insert(key, (owner, vec![*v]));
                    }
                    Op::Delete(k) => {
                        let key = format!("k{k}");
                        store.delete("t", &key).unwrap();
                        model.remove(&key);
                    }
                }
            }
        }

        let store = FileStore::open(dir.path()).unwrap();
        prop_assert_eq!(store.len("t").unwrap(), model.len());
        for (key, (owner, value)) in &model {
            let record = store.get("t", key).unwrap().unwrap();
            prop_assert_eq!(&record.value, value);
            prop_assert_eq!(record.index("owner"), Some(owner.as_str()));
        }
        for o in 0..3 {
            let owner = format!("o{o}");
            let expected = model.values().filter(|(ow, _)| *ow == owner).count();
            prop_assert_eq!(store.query("t", "owner", &owner).unwrap().len(), expected);
        }
    }
}
