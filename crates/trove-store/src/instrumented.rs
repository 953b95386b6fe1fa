use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StoreError, StoreResult};
use crate::traits::KvStore;

#[derive(Default)]
struct Counters {
    gets: HashMap<String, usize>,
    puts: HashMap<String, usize>,
    deletes: HashMap<String, usize>,
}

/// A [`KvStore`] wrapper that counts calls per key and injects failures.
///
/// Used to observe how often the pool touches the backing store (for
/// example, that a lazy field is fetched exactly once) and to exercise
/// partial-failure paths. Failed calls are still counted.
pub struct InstrumentedStore<S> {
    inner: S,
    counters: Mutex<Counters>,
    failing_puts: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    yield_on_get: AtomicBool,
    yield_on_put: AtomicBool,
}

impl<S: KvStore> InstrumentedStore<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counters: Mutex::new(Counters::default()),
            failing_puts: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            yield_on_get: AtomicBool::new(false),
            yield_on_put: AtomicBool::new(false),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of `get` calls made for `key`.
    pub fn get_count(&self, key: &str) -> usize {
        let counters = self.counters.lock().expect("counters lock poisoned");
        counters.gets.get(key).copied().unwrap_or(0)
    }

    /// Number of `put` calls made for `key`.
    pub fn put_count(&self, key: &str) -> usize {
        let counters = self.counters.lock().expect("counters lock poisoned");
        counters.puts.get(key).copied().unwrap_or(0)
    }

    /// Number of `delete` calls made for `key`.
    pub fn delete_count(&self, key: &str) -> usize {
        let counters = self.counters.lock().expect("counters lock poisoned");
        counters.deletes.get(key).copied().unwrap_or(0)
    }

    /// Total `get` calls across all keys.
    pub fn total_gets(&self) -> usize {
        let counters = self.counters.lock().expect("counters lock poisoned");
        counters.gets.values().sum()
    }

    /// Total `put` calls across all keys.
    pub fn total_puts(&self) -> usize {
        let counters = self.counters.lock().expect("counters lock poisoned");
        counters.puts.values().sum()
    }

    /// Reset every counter to zero.
    pub fn reset_counts(&self) {
        *self.counters.lock().expect("counters lock poisoned") = Counters::default();
    }

    /// Make every subsequent `put` of `key` fail.
    pub fn fail_puts_for(&self, key: &str) {
        self.failing_puts
            .lock()
            .expect("failure lock poisoned")
            .insert(key.to_string());
    }

    /// Make every subsequent `delete` of `key` fail.
    pub fn fail_deletes_for(&self, key: &str) {
        self.failing_deletes
            .lock()
            .expect("failure lock poisoned")
            .insert(key.to_string());
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.failing_puts.lock().expect("failure lock poisoned").clear();
        self.failing_deletes
            .lock()
            .expect("failure lock poisoned")
            .clear();
    }

    /// Yield to the scheduler once before every `get`, so concurrent
    /// readers interleave even over an in-memory store.
    pub fn set_yield_on_get(&self, enabled: bool) {
        self.yield_on_get.store(enabled, Ordering::SeqCst);
    }

    /// Yield once before every `put`, so other tasks run while a write is
    /// in progress.
    pub fn set_yield_on_put(&self, enabled: bool) {
        self.yield_on_put.store(enabled, Ordering::SeqCst);
    }

    fn bump(&self, op: &'static str, key: &str) {
        let mut counters = self.counters.lock().expect("counters lock poisoned");
        let map = match op {
            "get" => &mut counters.gets,
            "put" => &mut counters.puts,
            _ => &mut counters.deletes,
        };
        *map.entry(key.to_string()).or_insert(0) += 1;
    }

    fn injected(&self, set: &Mutex<HashSet<String>>, op: &'static str, key: &str) -> StoreResult<()> {
        if set.lock().expect("failure lock poisoned").contains(key) {
            return Err(StoreError::Rejected {
                op,
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KvStore> KvStore for InstrumentedStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.bump("get", key);
        if self.yield_on_get.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.bump("put", key);
        self.injected(&self.failing_puts, "put", key)?;
        if self.yield_on_put.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.bump("delete", key);
        self.injected(&self.failing_deletes, "delete", key)?;
        self.inner.delete(key).await
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.inner.all_keys().await
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        self.inner.contains(key).await
    }
}

impl<S> std::fmt::Debug for InstrumentedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;

    #[tokio::test]
    async fn counts_calls_per_key() {
        let store = InstrumentedStore::new(InMemoryKvStore::new());
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        store.get("a").await.unwrap();
        store.get("a").await.unwrap();
        store.get("b").await.unwrap();
        store.delete("a").await.unwrap();

        assert_eq!(store.put_count("a"), 1);
        assert_eq!(store.get_count("a"), 2);
        assert_eq!(store.get_count("b"), 1);
        assert_eq!(store.delete_count("a"), 1);
        assert_eq!(store.total_gets(), 3);
        assert_eq!(store.total_puts(), 1);

        store.reset_counts();
        assert_eq!(store.total_gets(), 0);
    }

    #[tokio::test]
    async fn injected_put_failure_leaves_value_untouched() {
        let store = InstrumentedStore::new(InMemoryKvStore::new());
        store.put("k", Bytes::from_static(b"old")).await.unwrap();
        store.fail_puts_for("k");

        let err = store.put("k", Bytes::from_static(b"new")).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { op: "put", .. }));
        assert_eq!(&store.inner().get_now("k").unwrap()[..], b"old");
        assert_eq!(store.put_count("k"), 2);

        store.clear_failures();
        store.put("k", Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(&store.inner().get_now("k").unwrap()[..], b"new");
    }

    #[tokio::test]
    async fn injected_delete_failure() {
        let store = InstrumentedStore::new(InMemoryKvStore::new());
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        store.fail_deletes_for("k");

        assert!(store.delete("k").await.is_err());
        assert!(store.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn yielding_get_still_returns_value() {
        let store = InstrumentedStore::new(InMemoryKvStore::new());
        store.set_yield_on_get(true);
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn yielding_put_lets_other_tasks_run_first() {
        let store = InstrumentedStore::new(InMemoryKvStore::new());
        store.set_yield_on_put(true);
        let observe = async { store.inner().get_now("k").is_some() };
        let (put, seen_before_write) =
            tokio::join!(store.put("k", Bytes::from_static(b"v")), observe);
        put.unwrap();
        assert!(!seen_before_write);
        assert!(store.inner().get_now("k").is_some());
    }
}
