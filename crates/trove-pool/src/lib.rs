//! Object pool for Trove.
//!
//! Persists a graph of mutable, possibly cyclic objects as flat records in a
//! [`KvStore`](trove_store::KvStore), loads lazily referenced parts of the
//! graph on first access, and reclaims records no longer reachable from the
//! root.
//!
//! # Model
//!
//! - A [`Schema`] is a static table of [`FieldDescriptor`]s. Each field is
//!   persisted or transient; persisted fields are stored inline or, when
//!   declared lazy, as a pointer to the object's own record.
//! - A [`Node`] holds one [`Value`] per field. Objects get a [`Pid`] the
//!   first time they are pointed at or made the root.
//! - Decoding a pointer yields a [`LazyProxy`]; [`Node::resolve`] swaps it
//!   for the loaded object exactly once.
//! - The [`ObjectPool`] keeps an identity map of materialized objects (weakly
//!   held), the dirty set, and the root. [`ObjectPool::flush`] writes dirty
//!   objects; [`ObjectPool::collect`] deletes unreachable records.
//!
//! ```no_run
//! use std::sync::Arc;
//! use trove_pool::{FieldDescriptor, ObjectPool, Schema};
//! use trove_store::InMemoryKvStore;
//!
//! const FOLDER_FIELDS: &[FieldDescriptor] = &[
//!     FieldDescriptor::persisted("name"),
//!     FieldDescriptor::lazy("parent"),
//! ];
//! static FOLDER: Schema = Schema::new("Folder", FOLDER_FIELDS);
//!
//! # async fn run() -> trove_pool::PoolResult<()> {
//! let pool = ObjectPool::builder(Arc::new(InMemoryKvStore::new()))
//!     .root_schema(&FOLDER)
//!     .build()?;
//! let root = pool.root_object().await?;
//! root.set("name", "home")?;
//! pool.flush().await?;
//! pool.collect().await?;
//! # Ok(())
//! # }
//! ```

mod codec;
pub mod collector;
pub mod config;
pub mod error;
pub mod lazy;
pub mod node;
pub mod pool;
mod resolver;
pub mod schema;
pub mod value;

#[cfg(test)]
mod testing;

pub use collector::CollectReport;
pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use lazy::LazyProxy;
pub use node::{Node, ObjectRef};
pub use pool::{FlushReport, ObjectPool, ObjectPoolBuilder};
pub use schema::{DefaultFn, FieldDescriptor, Schema, SchemaRegistry};
pub use trove_types::Pid;
pub use value::{OrderedMap, Value};
