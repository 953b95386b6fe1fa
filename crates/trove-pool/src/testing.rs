//! Shared fixtures for this crate's unit tests.

use std::sync::Arc;

use trove_store::{InMemoryKvStore, InstrumentedStore};

use crate::pool::ObjectPool;
use crate::schema::{FieldDescriptor, Schema};
use crate::value::Value;

pub(crate) type TestStore = Arc<InstrumentedStore<InMemoryKvStore>>;

const NOTE_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::persisted("title"),
    FieldDescriptor::persisted("tags").with_default(|| Value::List(Vec::new())),
    FieldDescriptor::persisted("child"),
    FieldDescriptor::persisted("items"),
    FieldDescriptor::lazy("next"),
    FieldDescriptor::lazy("links"),
    FieldDescriptor::transient("scratch"),
];

pub(crate) static NOTE: Schema = Schema::new("Note", NOTE_FIELDS);

const BLOB_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::persisted("data"),
    FieldDescriptor::persisted("meta"),
];

pub(crate) static BLOB: Schema = Schema::new("Blob", BLOB_FIELDS);

pub(crate) fn instrumented() -> TestStore {
    Arc::new(InstrumentedStore::new(InMemoryKvStore::new()))
}

/// A pool over a fresh instrumented in-memory store, rooted at `Note`.
pub(crate) fn memory_pool() -> (ObjectPool, TestStore) {
    let store = instrumented();
    (pool_on(&store), store)
}

/// A second pool over an existing store, as after a restart.
pub(crate) fn pool_on(store: &TestStore) -> ObjectPool {
    ObjectPool::builder(store.clone())
        .register(&BLOB)
        .root_schema(&NOTE)
        .build()
        .expect("test schemas are valid")
}
