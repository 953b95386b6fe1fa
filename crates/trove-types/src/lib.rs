//! Foundation types for Trove.
//!
//! This crate provides the identifier types shared by every other Trove
//! crate. It has no knowledge of records, codecs or backing stores.
//!
//! # Key Types
//!
//! - [`Pid`] -- Persistent identifier naming one stored object
//! - [`ROOT_KEY`] -- Default well-known key holding the root object's pid

pub mod error;
pub mod pid;

pub use error::TypeError;
pub use pid::{Pid, ROOT_KEY};
