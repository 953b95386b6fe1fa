use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};
use trove_cache::WeakValueCache;
use trove_record::{Record, RefValue};
use trove_store::KvStore;
use trove_types::Pid;

use crate::codec;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::node::{owner_chain, Node, ObjectRef};
use crate::resolver::{Decoder, Encoder};
use crate::schema::{Schema, SchemaRegistry};
use crate::value::Value;

type InFlight = Arc<OnceCell<ObjectRef>>;

/// Registration count below which the identity map is never purged.
const PURGE_FLOOR: usize = 64;

pub(crate) struct PoolShared {
    pub(crate) store: Arc<dyn KvStore>,
    registry: SchemaRegistry,
    root_schema: Option<&'static Schema>,
    pub(crate) config: PoolConfig,
    root: Mutex<Option<ObjectRef>>,
    root_key_dirty: AtomicBool,
    /// Materialized objects by pid, held weakly.
    identity: Mutex<WeakValueCache<Pid, Node>>,
    /// Registration count at which the identity map is next purged.
    purge_at: AtomicUsize,
    /// One shared fetch per pid being loaded.
    in_flight: Mutex<HashMap<Pid, InFlight>>,
    pub(crate) dirty: Mutex<BTreeMap<Pid, ObjectRef>>,
    /// Pids taken out of `dirty` by a flush whose write has not finished.
    pub(crate) writing: Mutex<HashSet<Pid>>,
    /// Held shared by `flush` and exclusively by `collect`.
    pub(crate) gate: tokio::sync::RwLock<()>,
    root_init: tokio::sync::Mutex<()>,
}

/// Outcome of a successful [`ObjectPool::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records written to the store.
    pub written: usize,
    /// Dirty objects whose encoded record matched the stored one.
    pub unchanged: usize,
    /// Whether the root key was rewritten.
    pub root_written: bool,
}

/// Owns the root object, assigns pids, tracks dirty objects and writes
/// them to a [`KvStore`].
///
/// Cheap to clone; clones share one pool. Objects and lazy references hold
/// weak handles back to it.
#[derive(Clone)]
pub struct ObjectPool {
    shared: Arc<PoolShared>,
}

impl ObjectPool {
    pub fn builder(store: Arc<dyn KvStore>) -> ObjectPoolBuilder {
        ObjectPoolBuilder {
            store,
            registry: SchemaRegistry::new(),
            root_schema: None,
            config: PoolConfig::default(),
            error: None,
        }
    }

    pub(crate) fn from_weak(pool: &Weak<PoolShared>) -> Option<Self> {
        pool.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn downgrade(&self) -> Weak<PoolShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn shared(&self) -> &PoolShared {
        &self.shared
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.shared.store
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    /// A new, empty object of a registered schema. It has no pid until it
    /// is pointed at or made the root.
    pub fn create(&self, schema: &'static Schema) -> PoolResult<ObjectRef> {
        if !self.shared.registry.contains(schema) {
            return Err(PoolError::UnregisteredSchema {
                type_name: schema.type_name,
            });
        }
        Ok(Node::new(schema, self.downgrade()))
    }

    /// Give `node` a pid if it has none. Never changes an existing pid.
    pub fn allocate_pid(&self, node: &ObjectRef) -> Pid {
        let mut fresh = false;
        let pid = node
            .assign_pid(|| {
                fresh = true;
                Pid::generate()
            })
            .clone();
        if fresh {
            self.register_identity(&pid, node);
            debug!(pid = %pid, type_name = node.type_name(), "allocated pid");
        }
        pid
    }

    /// Queue `node` for the next flush, along with every object it is
    /// stored inline in. Objects without a pid are skipped. Idempotent.
    pub fn mark_dirty(&self, node: &ObjectRef) {
        let chain = owner_chain(node);
        let mut dirty = self.shared.dirty.lock().expect("dirty lock poisoned");
        for object in chain {
            if let Some(pid) = object.pid() {
                if !dirty.contains_key(pid) {
                    trace!(pid = %pid, "marked dirty");
                    dirty.insert(pid.clone(), object);
                }
            }
        }
    }

    /// Pids awaiting flush, sorted.
    pub fn dirty_pids(&self) -> Vec<Pid> {
        self.shared
            .dirty
            .lock()
            .expect("dirty lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// The materialized object for `pid`, if one is live. Never fetches.
    pub fn lookup(&self, pid: &Pid) -> Option<ObjectRef> {
        self.identity().get(pid)
    }

    /// Number of live materialized objects with a pid.
    pub fn materialized_count(&self) -> usize {
        self.identity().len()
    }

    /// Pid of the in-memory root, if the root has been loaded or set.
    pub fn root_pid(&self) -> Option<Pid> {
        self.current_root().and_then(|root| root.pid().cloned())
    }

    /// The root object.
    ///
    /// Loaded through the root key on first call. When the store has no
    /// root key, a fresh root of the configured root schema is installed
    /// and written on the next flush.
    pub async fn root_object(&self) -> PoolResult<ObjectRef> {
        if let Some(root) = self.current_root() {
            return Ok(root);
        }
        let _init = self.shared.root_init.lock().await;
        if let Some(root) = self.current_root() {
            return Ok(root);
        }

        let key = self.shared.config.root_key.as_str();
        let root = match self.shared.store.get(key).await? {
            Some(bytes) => {
                let pid = self.read_root_pointer(&bytes)?;
                self.load(&pid).await?
            }
            None => {
                let schema = self.shared.root_schema.ok_or(PoolError::NoRootSchema)?;
                let root = Node::new(schema, self.downgrade());
                let pid = self.allocate_pid(&root);
                self.shared.root_key_dirty.store(true, Ordering::SeqCst);
                self.mark_dirty(&root);
                info!(pid = %pid, type_name = schema.type_name, "installed fresh root");
                root
            }
        };
        *self.shared.root.lock().expect("root lock poisoned") = Some(Arc::clone(&root));
        Ok(root)
    }

    /// Replace the root object. The old root's records stay in the store
    /// until a collection finds them unreachable.
    pub fn set_root(&self, node: &ObjectRef) -> PoolResult<()> {
        if !node.belongs_to(&self.shared) {
            return Err(PoolError::ForeignObject);
        }
        let pid = self.allocate_pid(node);
        *self.shared.root.lock().expect("root lock poisoned") = Some(Arc::clone(node));
        self.shared.root_key_dirty.store(true, Ordering::SeqCst);
        self.mark_dirty(node);
        info!(pid = %pid, type_name = node.type_name(), "root replaced");
        Ok(())
    }

    /// Encode `node` as it would be written on flush.
    ///
    /// Pointer targets without a pid are given one and queued for flush.
    pub fn encode_object(&self, node: &ObjectRef) -> PoolResult<Record> {
        codec::encode_object(&mut Encoder::new(self), node)
    }

    /// Decode a record into a detached value. Pointers become unloaded lazy
    /// references into this pool; decoded objects have no pid.
    pub fn decode_record(&self, record: &Record) -> PoolResult<Value> {
        codec::decode_record(&mut Decoder::new(self, record.type_name()), record)
    }

    /// Materialize `pid`, sharing one fetch among concurrent callers.
    pub(crate) async fn load(&self, pid: &Pid) -> PoolResult<ObjectRef> {
        if let Some(node) = self.lookup(pid) {
            return Ok(node);
        }
        let cell = {
            let mut in_flight = self.in_flight();
            Arc::clone(in_flight.entry(pid.clone()).or_default())
        };

        let result = cell.get_or_try_init(|| self.fetch(pid)).await.cloned();

        let mut in_flight = self.in_flight();
        if in_flight
            .get(pid)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(pid);
        }
        result
    }

    async fn fetch(&self, pid: &Pid) -> PoolResult<ObjectRef> {
        if let Some(node) = self.lookup(pid) {
            return Ok(node);
        }
        let key = pid.as_str();
        let bytes = self
            .shared
            .store
            .get(key)
            .await?
            .ok_or_else(|| PoolError::DanglingReference { pid: pid.clone() })?;
        let record = Record::from_bytes(&bytes).map_err(|e| PoolError::record(key, e))?;
        let Record::Object { type_name, entries } = &record else {
            return Err(PoolError::NotAnObject {
                key: key.to_string(),
                found: record.type_name().to_string(),
            });
        };

        let mut decoder = Decoder::new(self, key);
        let node = codec::new_object(&decoder, type_name)?;
        codec::decode_object_into(&mut decoder, &node, entries)?;
        node.assign_pid(|| pid.clone());
        node.set_stored_digest(Some(*blake3::hash(&bytes).as_bytes()));
        self.register_identity(pid, &node);
        debug!(pid = %pid, type_name = %type_name, bytes = bytes.len(), "materialized object");

        if decoder.drifted() && self.shared.config.resave_on_schema_drift {
            debug!(pid = %pid, "stored record differs from schema; queued for rewrite");
            self.mark_dirty(&node);
        }
        Ok(node)
    }

    /// Write every dirty object, then the root key if it changed.
    ///
    /// Objects discovered while encoding (new pointer targets) are written
    /// in the same call. A failed write leaves that object dirty and does
    /// not stop the others; the first error is returned once all writes
    /// have been attempted. Objects still being written by a concurrent
    /// flush are left to that flush.
    pub async fn flush(&self) -> PoolResult<FlushReport> {
        let _gate = self.shared.gate.read().await;
        let mut report = FlushReport::default();
        let mut failed = HashSet::new();
        let mut first_error = None;

        loop {
            let batch = self.take_batch(&failed);
            if batch.is_empty() {
                break;
            }
            for (pid, node) in batch {
                let outcome = self.write_object(&pid, &node).await;
                self.shared
                    .writing
                    .lock()
                    .expect("writing lock poisoned")
                    .remove(&pid);
                match outcome {
                    Ok(true) => report.written += 1,
                    Ok(false) => report.unchanged += 1,
                    Err(err) => {
                        warn!(pid = %pid, error = %err, "write failed; object stays dirty");
                        self.shared
                            .dirty
                            .lock()
                            .expect("dirty lock poisoned")
                            .entry(pid.clone())
                            .or_insert(node);
                        failed.insert(pid);
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        let root_pid = self.root_pid();
        let root_failed = root_pid.as_ref().is_some_and(|pid| failed.contains(pid));
        if !root_failed && self.shared.root_key_dirty.swap(false, Ordering::SeqCst) {
            match self.write_root_key(root_pid).await {
                Ok(()) => report.root_written = true,
                Err(err) => {
                    warn!(error = %err, "root key write failed");
                    self.shared.root_key_dirty.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(
                    written = report.written,
                    unchanged = report.unchanged,
                    root_written = report.root_written,
                    "flush complete"
                );
                Ok(report)
            }
        }
    }

    /// Move dirty objects not already being written into `writing`.
    fn take_batch(&self, skip: &HashSet<Pid>) -> Vec<(Pid, ObjectRef)> {
        let mut dirty = self.shared.dirty.lock().expect("dirty lock poisoned");
        let mut writing = self.shared.writing.lock().expect("writing lock poisoned");
        let ready: Vec<Pid> = dirty
            .keys()
            .filter(|pid| !writing.contains(*pid) && !skip.contains(*pid))
            .cloned()
            .collect();
        ready
            .into_iter()
            .filter_map(|pid| {
                let node = dirty.remove(&pid)?;
                writing.insert(pid.clone());
                Some((pid, node))
            })
            .collect()
    }

    /// Encode and store one object. Returns `false` when the write was
    /// skipped because the record is unchanged.
    async fn write_object(&self, pid: &Pid, node: &ObjectRef) -> PoolResult<bool> {
        let bytes = self.encode_object(node)?.to_bytes();
        let digest = *blake3::hash(&bytes).as_bytes();
        if self.shared.config.skip_unchanged_writes && node.stored_digest() == Some(digest) {
            trace!(pid = %pid, "record unchanged; skipping write");
            return Ok(false);
        }

        let len = bytes.len();
        self.shared.store.put(pid.as_str(), Bytes::from(bytes)).await?;
        node.set_stored_digest(Some(digest));
        debug!(pid = %pid, type_name = node.type_name(), bytes = len, "wrote record");
        Ok(true)
    }

    async fn write_root_key(&self, root_pid: Option<Pid>) -> PoolResult<()> {
        let Some(pid) = root_pid else {
            return Ok(());
        };
        let bytes = RefValue::Pointer(pid.clone()).to_bytes();
        self.shared
            .store
            .put(&self.shared.config.root_key, Bytes::from(bytes))
            .await?;
        debug!(pid = %pid, key = %self.shared.config.root_key, "wrote root key");
        Ok(())
    }

    pub(crate) fn read_root_pointer(&self, bytes: &[u8]) -> PoolResult<Pid> {
        let key = self.shared.config.root_key.as_str();
        match RefValue::from_bytes(bytes).map_err(|e| PoolError::record(key, e))? {
            RefValue::Pointer(pid) => Ok(pid),
            _ => Err(PoolError::malformed(key, "root key does not hold a pointer")),
        }
    }

    /// Add `node` to the identity map, purging dead registrations once
    /// their count has doubled since the last purge.
    fn register_identity(&self, pid: &Pid, node: &ObjectRef) {
        let mut identity = self.identity();
        identity.insert(pid.clone(), node);
        if identity.registered_values() >= self.shared.purge_at.load(Ordering::Relaxed) {
            self.purge_locked(&mut identity);
        }
    }

    /// Drop identity-map entries whose objects have been reclaimed.
    pub(crate) fn purge_identity(&self) {
        self.purge_locked(&mut self.identity());
    }

    fn purge_locked(&self, identity: &mut WeakValueCache<Pid, Node>) {
        let reaped = identity.purge();
        let remaining = identity.registered_values();
        self.shared
            .purge_at
            .store(PURGE_FLOOR.max(remaining * 2), Ordering::Relaxed);
        if reaped > 0 {
            trace!(reaped, remaining, "purged identity map");
        }
    }

    fn current_root(&self) -> Option<ObjectRef> {
        self.shared.root.lock().expect("root lock poisoned").clone()
    }

    fn identity(&self) -> MutexGuard<'_, WeakValueCache<Pid, Node>> {
        self.shared.identity.lock().expect("identity lock poisoned")
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<Pid, InFlight>> {
        self.shared.in_flight.lock().expect("in-flight lock poisoned")
    }
}

impl fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("root_key", &self.shared.config.root_key)
            .field("schemas", &self.shared.registry.type_names())
            .field("dirty", &self.dirty_pids().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ObjectPool`].
pub struct ObjectPoolBuilder {
    store: Arc<dyn KvStore>,
    registry: SchemaRegistry,
    root_schema: Option<&'static Schema>,
    config: PoolConfig,
    error: Option<PoolError>,
}

impl ObjectPoolBuilder {
    /// Make `schema` decodable by the pool.
    pub fn register(mut self, schema: &'static Schema) -> Self {
        if let Err(err) = self.registry.register(schema) {
            self.error.get_or_insert(err);
        }
        self
    }

    /// Schema of the fresh root installed into an empty store. Also
    /// registers it.
    pub fn root_schema(mut self, schema: &'static Schema) -> Self {
        self.root_schema = Some(schema);
        self.register(schema)
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pool, failing on the first invalid registration.
    pub fn build(self) -> PoolResult<ObjectPool> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let identity = WeakValueCache::with_finalizer(|pid: &Pid| {
            trace!(pid = %pid, "evicted from identity map");
        });
        Ok(ObjectPool {
            shared: Arc::new(PoolShared {
                store: self.store,
                registry: self.registry,
                root_schema: self.root_schema,
                config: self.config,
                root: Mutex::new(None),
                root_key_dirty: AtomicBool::new(false),
                identity: Mutex::new(identity),
                purge_at: AtomicUsize::new(PURGE_FLOOR),
                in_flight: Mutex::new(HashMap::new()),
                dirty: Mutex::new(BTreeMap::new()),
                writing: Mutex::new(HashSet::new()),
                gate: tokio::sync::RwLock::new(()),
                root_init: tokio::sync::Mutex::new(()),
            }),
        })
    }
}
