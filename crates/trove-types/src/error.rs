use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("persistent id is empty")]
    EmptyPid,

    #[error("invalid character {ch:?} in persistent id {pid:?}")]
    InvalidPidChar { pid: String, ch: char },
}
