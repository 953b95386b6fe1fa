use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreResult;
use crate::traits::KvStore;

/// In-memory, `BTreeMap`-based key/value store.
///
/// Intended for tests and embedding. Values are `Bytes`, so reads share the
/// stored buffer instead of copying it.
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
}

impl InMemoryKvStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored values.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|value| value.len() as u64)
            .sum()
    }

    /// Remove every key from the store.
    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }

    /// Synchronous read, for tests that inspect stored bytes directly.
    pub fn get_now(&self, key: &str) -> Option<Bytes> {
        self.entries.read().expect("lock poisoned").get(key).cloned()
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        Ok(self.get_now(key))
    }

    async fn put(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut map = self.entries.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.keys().cloned().collect())
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.read().expect("lock poisoned").contains_key(key))
    }
}

impl std::fmt::Debug for InMemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKvStore")
            .field("key_count", &self.len())
            .finish()
    }
}
