//! Backing key/value stores for Trove.
//!
//! The object pool persists one record per persistent identifier into a
//! flat key/value store. This crate defines that contract and ships the
//! backends used by the rest of the workspace.
//!
//! # Storage Backends
//!
//! All backends implement the [`KvStore`] trait:
//!
//! - [`InMemoryKvStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`FileKvStore`] -- one CRC-framed file per key in a directory
//! - [`InstrumentedStore`] -- wrapper counting calls and injecting failures
//!
//! # Design Rules
//!
//! 1. The store never interprets values -- it is a pure key-value store.
//! 2. A `put` either fully replaces the value or leaves the old one intact.
//! 3. Concurrent calls are serialized by the backend itself.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod instrumented;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::{FileKvStore, FileStoreConfig};
pub use instrumented::InstrumentedStore;
pub use memory::InMemoryKvStore;
pub use traits::KvStore;
