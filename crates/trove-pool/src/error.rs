use trove_record::RecordError;
use trove_store::StoreError;
use trove_types::Pid;

/// Errors surfaced by the object pool, its field accessors, and the
/// collector.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A record's `type` has no registered schema.
    #[error("unknown record type {type_name:?}")]
    UnknownRecordType { type_name: String },

    /// A buffer record's declared length disagrees with its payload.
    #[error("record {key}: length mismatch, declared {declared}, found {actual}")]
    RecordLengthMismatch {
        key: String,
        declared: usize,
        actual: usize,
    },

    /// A pointer names a pid with no stored record.
    #[error("dangling reference to {pid}")]
    DanglingReference { pid: Pid },

    /// The backing store rejected an operation.
    #[error("backing store failure: {0}")]
    BackingStoreFailure(#[from] StoreError),

    /// A stored value is not a well-formed record.
    #[error("malformed record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    /// An object was reached again while encoding itself inline.
    #[error("inline cycle through {type_name} object")]
    InlineCycle { type_name: &'static str },

    /// The schema declares no field with this name.
    #[error("{type_name} has no field {field:?}")]
    UnknownField {
        type_name: &'static str,
        field: String,
    },

    /// Objects can only be created from schemas registered with the pool.
    #[error("schema {type_name:?} is not registered with this pool")]
    UnregisteredSchema { type_name: &'static str },

    /// The object was created by a different pool.
    #[error("object belongs to a different pool")]
    ForeignObject,

    /// The pool behind a lazy reference or object has been dropped.
    #[error("object pool has been dropped")]
    PoolClosed,

    /// A pid names a record that is not an object record.
    #[error("record {key} is a {found} record, not an object")]
    NotAnObject { key: String, found: String },

    /// NaN and infinities have no JSON representation.
    #[error("cannot persist non-finite number {value}")]
    NonFiniteNumber { value: f64 },

    /// The store holds records but no root key.
    #[error("store has records but no root key {key:?}")]
    MissingRoot { key: String },

    /// The store is empty and the pool has no schema to build a root from.
    #[error("no root schema configured")]
    NoRootSchema,

    /// Two schemas were registered under one type name.
    #[error("schema {type_name:?} registered twice")]
    DuplicateSchema { type_name: &'static str },

    /// Object schemas may not use the built-in container tags.
    #[error("type name {type_name:?} is reserved")]
    ReservedTypeName { type_name: &'static str },
}

impl PoolError {
    /// Attach the offending store key to a record parse error.
    pub(crate) fn record(key: &str, err: RecordError) -> Self {
        match err {
            RecordError::LengthMismatch { declared, actual } => Self::RecordLengthMismatch {
                key: key.to_string(),
                declared,
                actual,
            },
            other => Self::MalformedRecord {
                key: key.to_string(),
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn malformed(key: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
