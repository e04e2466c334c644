//! Benchmark utilities.

#![warn(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use smuggler_core::{DocumentStore, MemoryStore, MemoryStoreConfig};
use std::sync::Arc;

/// Generate a random document body with a text field of `size` characters.
pub fn random_body(size: usize) -> Value {
    let mut rng = rand::thread_rng();
    let text: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect();
    json!({ "Text": text, "Score": rng.gen::<u32>() })
}

/// Create a store holding `count` documents with `payload_size` bodies.
pub fn populated_store(count: usize, payload_size: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::with_config(
        "Bench",
        MemoryStoreConfig::new().with_max_batch_size(4096),
    ));
    for i in 0..count {
        store
            .put(&format!("docs/{i}"), random_body(payload_size), Map::new())
            .expect("put");
    }
    store
}

/// Delete every `nth` document of a store built by [`populated_store`].
pub fn delete_every(store: &MemoryStore, count: usize, nth: usize) {
    for i in (0..count).step_by(nth.max(1)) {
        store.delete_if_exists(&format!("docs/{i}")).expect("delete");
    }
}
