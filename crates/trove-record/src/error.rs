/// Errors produced while parsing or validating records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The bytes are not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON does not have the shape of a record.
    #[error("malformed record: {reason}")]
    Malformed { reason: String },

    /// A buffer record's declared length disagrees with its payload.
    #[error("record length mismatch: declared {declared}, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

impl RecordError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Result alias for record operations.
pub type RecordResult<T> = Result<T, RecordError>;
