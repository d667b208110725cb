//! Persistence is an external capability (spec §1 Non-goals, §6): this
//! module only defines the `Store` contract and a versioned in-memory
//! implementation suitable for tests and single-process deployments.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Every persisted value is wrapped with a format version so a future
/// schema change can detect and migrate old records (spec §6: "format is
/// implementation-defined but MUST be versioned").
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub value: T,
}

pub const CURRENT_VERSION: u32 = 1;

pub trait Store: Send + Sync {
    fn save(&self, key: &str, bytes: Vec<u8>);
    fn load(&self, key: &str) -> Option<Vec<u8>>;
}

/// In-memory `Store`. A real deployment supplies its own (file, object
/// store, database) behind the same trait.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save(&self, key: &str, bytes: Vec<u8>) {
        self.entries.lock().unwrap().insert(key.to_string(), bytes);
    }

    fn load(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

pub fn save_versioned<S: Store + ?Sized, T: Serialize>(store: &S, key: &str, value: T) {
    let envelope = Envelope {
        version: CURRENT_VERSION,
        value,
    };
    if let Ok(bytes) = serde_json::to_vec(&envelope) {
        store.save(key, bytes);
    }
}

pub fn load_versioned<S: Store + ?Sized, T: DeserializeOwned>(store: &S, key: &str) -> Option<T> {
    let bytes = store.load(key)?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes).ok()?;
    Some(envelope.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_memory_store() {
        let store = MemoryStore::new();
        save_versioned(&store, "global_model", vec![1.0_f32, 2.0]);
        let loaded: Vec<f32> = load_versioned(&store, "global_model").unwrap();
        assert_eq!(loaded, vec![1.0, 2.0]);
    }

    #[test]
    fn missing_key_loads_none() {
        let store = MemoryStore::new();
        let loaded: Option<Vec<f32>> = load_versioned(&store, "missing");
        assert!(loaded.is_none());
    }
}
