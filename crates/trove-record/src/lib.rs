//! Flat record format for Trove.
//!
//! A [`Record`] is the serialized form of one stored object or one built-in
//! container value. Records are the only thing written to a backing store:
//! each one is a JSON object with a `type` tag and a type-specific payload.
//!
//! # Record Shapes
//!
//! ```text
//! object   {"type": "<schema>", "entries": [["field", <ref>], ...]}
//! array    {"type": "Array",    "values":  [<ref>, ...]}
//! map      {"type": "Map",      "entries": [["key", <ref>], ...]}
//! bytes    {"type": "Bytes",    "length": n, "bytes": [0-255, ...]}
//! json     {"type": "Json",     "jsonString": "<canonical JSON>"}
//! ```
//!
//! A `<ref>` ([`RefValue`]) is a JSON scalar, a pointer wrapper
//! `{"*": "<pid>"}`, or a nested record.
//!
//! Records are serialized with [`canonical`] JSON (object keys sorted at
//! every depth, no whitespace), so encoding an unchanged record twice yields
//! identical bytes.

pub mod canonical;
pub mod error;
pub mod record;

pub use error::{RecordError, RecordResult};
pub use record::{
    Record, RefValue, ARRAY_TYPE, BYTES_TYPE, JSON_TYPE, MAP_TYPE, POINTER_KEY, RESERVED_TYPES,
};
