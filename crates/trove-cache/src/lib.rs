//! Weak-value cache for Trove.
//!
//! [`WeakValueCache`] maps keys of any hashable type to values held only by
//! [`std::sync::Weak`] references. Once every strong reference to a value is
//! dropped, the entries pointing at it are reaped: lazily when they are
//! looked up, or eagerly via [`WeakValueCache::purge`].
//!
//! The object pool uses it as its identity map (pid to materialized object),
//! but it has no knowledge of persistence and can back any keyed cache, such
//! as fetched resources keyed by URL.

pub mod weak;

pub use weak::WeakValueCache;
