use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use tracing::trace;

/// Callback invoked once per key whose value has been reclaimed.
pub type Finalizer<K> = Box<dyn Fn(&K) + Send + Sync>;

/// One tracked value and every key currently pointing at it.
///
/// The `Weak` keeps the allocation (not the value) alive, so the address
/// used to index registrations cannot be reused while it is registered.
struct Registration<K, V> {
    value: Weak<V>,
    keys: HashSet<K>,
}

/// A key/value map whose values are held weakly.
///
/// Values are registered by allocation identity. Several keys may point at
/// the same value; deleting one of them only unregisters that key, and the
/// value stays tracked for the remaining keys until it is reclaimed.
///
/// Reclaimed values are detected when they are looked up
/// ([`get`](Self::get), [`has`](Self::has)) or on [`purge`](Self::purge).
/// [`len`](Self::len) and [`values`](Self::values) skip stale entries
/// without removing them; both walk every entry and are O(n).
pub struct WeakValueCache<K, V> {
    entries: HashMap<K, usize>,
    registrations: HashMap<usize, Registration<K, V>>,
    finalizer: Option<Finalizer<K>>,
}

fn address<V>(value: &Arc<V>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

impl<K, V> WeakValueCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            registrations: HashMap::new(),
            finalizer: None,
        }
    }

    /// Create an empty cache that calls `finalizer` for every key reaped
    /// because its value was reclaimed. Explicit deletes do not call it.
    pub fn with_finalizer(finalizer: impl Fn(&K) + Send + Sync + 'static) -> Self {
        Self {
            finalizer: Some(Box::new(finalizer)),
            ..Self::new()
        }
    }

    /// Set `key` to `value`, or delete `key` when `value` is `None`.
    ///
    /// Setting a key to the value it already holds is a no-op.
    pub fn set(&mut self, key: K, value: Option<&Arc<V>>) {
        match value {
            Some(value) => self.insert(key, value),
            None => {
                self.delete(&key);
            }
        }
    }

    /// Point `key` at `value`, replacing any previous entry for `key`.
    pub fn insert(&mut self, key: K, value: &Arc<V>) {
        let addr = address(value);
        if let Some(&current) = self.entries.get(&key) {
            if current == addr && self.is_live(addr) {
                return;
            }
            self.unregister(&key, current);
        }

        let registration = self
            .registrations
            .entry(addr)
            .or_insert_with(|| Registration {
                value: Arc::downgrade(value),
                keys: HashSet::new(),
            });
        registration.keys.insert(key.clone());
        self.entries.insert(key, addr);
    }

    /// Look up `key`, reaping the entry if its value has been reclaimed.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        let addr = *self.entries.get(key)?;
        let live = self
            .registrations
            .get(&addr)
            .and_then(|registration| registration.value.upgrade());
        if live.is_none() {
            self.reap(addr);
        }
        live
    }

    /// Returns `true` if `key` maps to a value that is still alive.
    pub fn has(&mut self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`. Returns `true` if the key was present.
    pub fn delete(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(addr) => {
                self.unregister(key, addr);
                true
            }
            None => false,
        }
    }

    /// Number of entries whose value is still alive.
    ///
    /// Walks every entry.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|addr| self.is_live(**addr))
            .count()
    }

    /// Returns `true` if no entry has a live value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live values, once per entry.
    ///
    /// Walks every entry; a value registered under two keys appears twice.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.entries
            .values()
            .filter_map(|addr| self.registrations.get(addr)?.value.upgrade())
            .collect()
    }

    /// Live keys paired with their values.
    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        self.entries
            .iter()
            .filter_map(|(key, addr)| {
                let value = self.registrations.get(addr)?.value.upgrade()?;
                Some((key.clone(), value))
            })
            .collect()
    }

    /// Eagerly reap every entry whose value has been reclaimed.
    ///
    /// Returns the number of keys removed.
    pub fn purge(&mut self) -> usize {
        let stale: Vec<usize> = self
            .registrations
            .iter()
            .filter(|(_, registration)| registration.value.strong_count() == 0)
            .map(|(addr, _)| *addr)
            .collect();
        stale.into_iter().map(|addr| self.reap(addr)).sum()
    }

    /// Number of distinct values currently registered, live or not yet reaped.
    pub fn registered_values(&self) -> usize {
        self.registrations.len()
    }

    fn is_live(&self, addr: usize) -> bool {
        self.registrations
            .get(&addr)
            .is_some_and(|registration| registration.value.strong_count() > 0)
    }

    fn unregister(&mut self, key: &K, addr: usize) {
        if let Some(registration) = self.registrations.get_mut(&addr) {
            registration.keys.remove(key);
            if registration.keys.is_empty() {
                self.registrations.remove(&addr);
            }
        }
    }

    fn reap(&mut self, addr: usize) -> usize {
        let Some(registration) = self.registrations.remove(&addr) else {
            return 0;
        };
        let count = registration.keys.len();
        for key in &registration.keys {
            self.entries.remove(key);
            if let Some(finalizer) = &self.finalizer {
                finalizer(key);
            }
        }
        trace!(keys = count, "reaped reclaimed cache value");
        count
    }
}

impl<K, V> Default for WeakValueCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for WeakValueCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakValueCache")
            .field("entries", &self.entries.len())
            .field("registered_values", &self.registrations.len())
            .field("has_finalizer", &self.finalizer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn live_value_is_visible() {
        let mut cache = WeakValueCache::new();
        let value = Arc::new("hello".to_string());
        cache.set("k", Some(&value));

        assert!(cache.has(&"k"));
        assert_eq!(cache.get(&"k").as_deref(), Some(&"hello".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn dropped_value_disappears() {
        let mut cache = WeakValueCache::new();
        let value = Arc::new(7u32);
        cache.insert(1u8, &value);
        assert!(cache.has(&1));

        drop(value);
        assert_eq!(cache.len(), 0);
        assert!(cache.values().is_empty());
        assert!(!cache.has(&1));
        assert_eq!(cache.registered_values(), 0);
    }

    #[test]
    fn setting_none_deletes() {
        let mut cache = WeakValueCache::new();
        let value = Arc::new(1);
        cache.set("k", Some(&value));
        cache.set("k", None);
        assert!(!cache.has(&"k"));
        assert_eq!(cache.registered_values(), 0);
    }

    #[test]
    fn setting_same_value_is_noop() {
        let mut cache = WeakValueCache::new();
        let value = Arc::new(1);
        cache.insert("k", &value);
        cache.insert("k", &value);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.registered_values(), 1);
    }

    #[test]
    fn replacing_value_moves_registration() {
        let mut cache = WeakValueCache::new();
        let first = Arc::new(1);
        let second = Arc::new(2);
        cache.insert("k", &first);
        cache.insert("k", &second);

        assert_eq!(cache.registered_values(), 1);
        assert_eq!(*cache.get(&"k").unwrap(), 2);
    }

    #[test]
    fn value_under_two_keys_survives_one_delete() {
        let reaped = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reaped);
        let mut cache = WeakValueCache::with_finalizer(move |key: &&str| {
            sink.lock().unwrap().push(key.to_string());
        });

        let value = Arc::new("shared".to_string());
        cache.insert("a", &value);
        cache.insert("b", &value);
        assert_eq!(cache.registered_values(), 1);

        assert!(cache.delete(&"a"));
        assert_eq!(cache.registered_values(), 1);
        assert!(cache.has(&"b"));

        drop(value);
        assert_eq!(cache.purge(), 1);
        assert!(!cache.has(&"b"));
        assert_eq!(*reaped.lock().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn explicit_delete_does_not_finalize() {
        let calls = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&calls);
        let mut cache = WeakValueCache::with_finalizer(move |_: &u32| {
            *sink.lock().unwrap() += 1;
        });
        let value = Arc::new(());
        cache.insert(1, &value);
        cache.delete(&1);
        drop(value);
        cache.purge();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn lazy_reap_on_get_finalizes_every_key() {
        let calls = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&calls);
        let mut cache = WeakValueCache::with_finalizer(move |_: &u32| {
            *sink.lock().unwrap() += 1;
        });
        let value = Arc::new("v");
        cache.insert(1, &value);
        cache.insert(2, &value);
        drop(value);

        assert!(cache.get(&1).is_none());
        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn values_and_len_skip_stale_entries() {
        let mut cache = WeakValueCache::new();
        let kept = Arc::new(1);
        let dropped = Arc::new(2);
        cache.insert("kept", &kept);
        cache.insert("dropped", &dropped);
        drop(dropped);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.values(), vec![Arc::clone(&kept)]);
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.registered_values(), 1);
    }

    #[test]
    fn debug_format() {
        let cache: WeakValueCache<String, u8> = WeakValueCache::default();
        let debug = format!("{cache:?}");
        assert!(debug.contains("WeakValueCache"));
        assert!(debug.contains("registered_values"));
    }
}
