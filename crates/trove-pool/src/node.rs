use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use tracing::debug;
use trove_types::Pid;

use crate::error::{PoolError, PoolResult};
use crate::pool::{ObjectPool, PoolShared};
use crate::schema::{FieldDescriptor, Schema};
use crate::value::{OrderedMap, Value};

/// Shared handle to a storable object.
pub type ObjectRef = Arc<Node>;

/// A storable object: a schema plus one value slot per declared field.
///
/// Field reads and writes are synchronous. Writing a persisted field marks
/// the object dirty in its pool; reading a lazy field through
/// [`resolve`](Node::resolve) loads the referenced object on first access.
pub struct Node {
    schema: &'static Schema,
    pid: OnceLock<Pid>,
    slots: RwLock<Vec<Value>>,
    /// The object this one is stored inline in, if any.
    owner: Mutex<Weak<Node>>,
    pool: Weak<PoolShared>,
    /// BLAKE3 digest of the record last written or loaded for this object.
    stored_digest: Mutex<Option<[u8; 32]>>,
}

impl Node {
    pub(crate) fn new(schema: &'static Schema, pool: Weak<PoolShared>) -> ObjectRef {
        let slots = schema
            .fields
            .iter()
            .map(FieldDescriptor::default_value)
            .collect();
        Arc::new(Self {
            schema,
            pid: OnceLock::new(),
            slots: RwLock::new(slots),
            owner: Mutex::new(Weak::new()),
            pool,
            stored_digest: Mutex::new(None),
        })
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn type_name(&self) -> &'static str {
        self.schema.type_name
    }

    /// The object's pid, once one has been assigned.
    pub fn pid(&self) -> Option<&Pid> {
        self.pid.get()
    }

    /// Current value of a field. Lazy fields that have not been loaded
    /// yet return [`Value::Lazy`].
    pub fn get(&self, name: &str) -> PoolResult<Value> {
        let index = self.index_of(name)?;
        Ok(self.slots.read().expect("slots lock poisoned")[index].clone())
    }

    /// Set a field.
    ///
    /// Objects stored into a non-lazy field become owned by this object:
    /// they are written inline in its record, and marking them dirty marks
    /// this object dirty.
    pub fn set(self: &Arc<Self>, name: &str, value: impl Into<Value>) -> PoolResult<()> {
        let index = self.index_of(name)?;
        let field = &self.schema.fields[index];
        let value = value.into();
        if !field.lazy {
            adopt(&value, self);
        }

        let changed = {
            let mut slots = self.slots.write().expect("slots lock poisoned");
            let old = std::mem::replace(&mut slots[index], value);
            old != slots[index]
        };
        if changed && field.persisted {
            self.mark_dirty();
        }
        Ok(())
    }

    /// Read a field, loading any lazy references it holds.
    ///
    /// The first successful call replaces the field's lazy references with
    /// the loaded objects; later calls return them without touching the
    /// store. Concurrent first calls share one fetch per pid. On failure
    /// the field keeps its lazy references so the call can be retried.
    pub async fn resolve(self: &Arc<Self>, name: &str) -> PoolResult<Value> {
        let index = self.index_of(name)?;
        let current = self.slots.read().expect("slots lock poisoned")[index].clone();
        if !current.has_lazy() {
            return Ok(current);
        }

        let loaded = materialize(current.clone()).await?;
        let mut slots = self.slots.write().expect("slots lock poisoned");
        if slots[index] == current {
            slots[index] = loaded.clone();
            debug!(
                type_name = self.type_name(),
                field = name,
                "materialized lazy field"
            );
            Ok(loaded)
        } else {
            // Replaced by a concurrent resolve or set while we were loading.
            Ok(slots[index].clone())
        }
    }

    /// Returns `true` if the field holds no unloaded lazy references.
    pub fn is_loaded(&self, name: &str) -> PoolResult<bool> {
        Ok(!self.get(name)?.has_lazy())
    }

    /// Mark this object (and every object it is stored inline in) dirty.
    ///
    /// Only objects with a pid are tracked; a new object is written once
    /// something points at it.
    pub fn mark_dirty(self: &Arc<Self>) {
        if let Some(pool) = ObjectPool::from_weak(&self.pool) {
            pool.mark_dirty(self);
        }
    }

    /// The object this one is stored inline in.
    pub fn owner(&self) -> Option<ObjectRef> {
        self.owner.lock().expect("owner lock poisoned").upgrade()
    }

    pub(crate) fn set_owner(&self, owner: &ObjectRef) {
        *self.owner.lock().expect("owner lock poisoned") = Arc::downgrade(owner);
    }

    /// Clone of every slot, in field order.
    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.slots.read().expect("slots lock poisoned").clone()
    }

    /// Fill a slot while decoding. Does not mark dirty.
    pub(crate) fn load_slot(&self, index: usize, value: Value) {
        self.slots.write().expect("slots lock poisoned")[index] = value;
    }

    /// Assign `pid` unless the object already has one. Returns the pid the
    /// object ends up with.
    pub(crate) fn assign_pid(&self, make: impl FnOnce() -> Pid) -> &Pid {
        self.pid.get_or_init(make)
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolShared>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }

    pub(crate) fn stored_digest(&self) -> Option<[u8; 32]> {
        *self.stored_digest.lock().expect("digest lock poisoned")
    }

    pub(crate) fn set_stored_digest(&self, digest: Option<[u8; 32]>) {
        *self.stored_digest.lock().expect("digest lock poisoned") = digest;
    }

    fn index_of(&self, name: &str) -> PoolResult<usize> {
        self.schema
            .field_index(name)
            .ok_or_else(|| PoolError::UnknownField {
                type_name: self.schema.type_name,
                field: name.to_string(),
            })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type_name", &self.schema.type_name)
            .field("pid", &self.pid.get())
            .finish_non_exhaustive()
    }
}

/// Record `owner` as the owner of every object directly in `value` or in
/// its lists and maps.
pub(crate) fn adopt(value: &Value, owner: &ObjectRef) {
    match value {
        Value::Object(node) => node.set_owner(owner),
        Value::List(items) => items.iter().for_each(|item| adopt(item, owner)),
        Value::Map(map) => map.values().for_each(|item| adopt(item, owner)),
        _ => {}
    }
}

type Materialize = Pin<Box<dyn Future<Output = PoolResult<Value>> + Send>>;

/// Replace every lazy reference in `value` with its loaded object.
fn materialize(value: Value) -> Materialize {
    Box::pin(async move {
        match value {
            Value::Lazy(proxy) => Ok(Value::Object(proxy.materialize().await?)),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(materialize(item).await?);
                }
                Ok(Value::List(out))
            }
            Value::Map(map) => {
                let mut out = OrderedMap::new();
                for (key, item) in map {
                    out.insert(key, materialize(item).await?);
                }
                Ok(Value::Map(out))
            }
            other => Ok(other),
        }
    })
}

/// Walk the inline-owner chain from `node`, visiting each object once.
pub(crate) fn owner_chain(node: &ObjectRef) -> Vec<ObjectRef> {
    let mut seen = HashSet::new();
    let mut chain = Vec::new();
    let mut current = Some(Arc::clone(node));
    while let Some(next) = current {
        if !seen.insert(Arc::as_ptr(&next) as usize) {
            break;
        }
        current = next.owner();
        chain.push(next);
    }
    chain
}
