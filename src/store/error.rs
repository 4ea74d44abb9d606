use crate::persistence::records::RecordError;
use thiserror::Error;

/// Errors surfaced by Submit, Query and List
#[derive(Debug, Error)]
pub enum StoreError {
    /// Value was not a finite number
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Empty namespace or counter name
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Named resolution hint not present in the ladder
    #[error("unknown resolution: {0}")]
    UnknownResolution(String),

    /// Key-value engine failure
    #[error("backend error: {0}")]
    Backend(#[from] std::io::Error),

    /// Stored counter record could not be decoded
    #[error("corrupt record {key}: {source}")]
    Record { key: String, source: RecordError },
}

impl StoreError {
    /// Client-side mistakes, as opposed to server-side failures
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidValue(_) | StoreError::InvalidKey(_) | StoreError::UnknownResolution(_)
        )
    }
}
