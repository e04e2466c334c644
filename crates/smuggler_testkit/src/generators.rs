//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use smuggler_core::{DocumentStore, Etag, MemoryStore};

/// Strategy for etags issued after at least one restart.
pub fn etag_strategy() -> impl Strategy<Value = Etag> {
    (1u64..16, 1u64..1_000_000).prop_map(|(restarts, changes)| Etag::new(restarts, changes))
}

/// Strategy for document keys drawn from a small keyspace, so workloads
/// update and delete the same keys repeatedly.
pub fn key_strategy(keyspace: usize) -> impl Strategy<Value = String> {
    (0..keyspace.max(1)).prop_map(|i| format!("users/{i}"))
}

/// Strategy for document bodies.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    (
        prop::string::string_regex("[a-zA-Z ]{0,24}").expect("Invalid regex"),
        any::<i32>(),
        any::<bool>(),
    )
        .prop_map(|(name, score, active)| json!({ "Name": name, "Score": score, "Active": active }))
}

/// One write against a store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Put a document.
    Put(String, Value),
    /// Delete a document if it exists.
    Delete(String),
}

impl StoreOp {
    /// Applies the operation.
    pub fn apply(&self, store: &MemoryStore) {
        match self {
            Self::Put(key, body) => {
                store
                    .put(key, body.clone(), Map::new())
                    .expect("put");
            }
            Self::Delete(key) => {
                store.delete_if_exists(key).expect("delete");
            }
        }
    }
}

/// Strategy for a write workload over `keyspace` keys. Roughly one in four
/// operations is a delete.
pub fn workload_strategy(keyspace: usize, max_ops: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    let op = prop_oneof![
        3 => (key_strategy(keyspace), payload_strategy()).prop_map(|(k, v)| StoreOp::Put(k, v)),
        1 => key_strategy(keyspace).prop_map(StoreOp::Delete),
    ];
    prop::collection::vec(op, 0..max_ops.max(1))
}

/// Strategy for a workload split into rounds, with an export between rounds.
pub fn rounds_strategy(
    keyspace: usize,
    max_rounds: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Vec<StoreOp>>> {
    prop::collection::vec(workload_strategy(keyspace, max_ops), 1..max_rounds.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_etags_are_not_empty(etag in etag_strategy()) {
            prop_assert!(!etag.is_empty());
        }

        #[test]
        fn workloads_stay_in_keyspace(ops in workload_strategy(4, 32)) {
            for op in ops {
                let key = match op {
                    StoreOp::Put(key, _) | StoreOp::Delete(key) => key,
                };
                let index: usize = key.trim_start_matches("users/").parse().unwrap();
                prop_assert!(index < 4);
            }
        }
    }
}
