use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreResult;

/// Flat key/value store backing an object pool.
///
/// All implementations must satisfy these invariants:
/// - `put` is atomic per key: readers see the old value or the new one.
/// - Concurrent calls are safe; the backend serializes them itself.
/// - The store never interprets values.
/// - All I/O errors are propagated, never silently ignored.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Create or replace the value stored under `key`.
    async fn put(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Delete `key`. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Every key currently present, sorted.
    async fn all_keys(&self) -> StoreResult<Vec<String>>;

    /// Check whether a key exists.
    ///
    /// Default implementation reads the value. Backends may override.
    async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
