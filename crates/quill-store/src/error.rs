use quill_core::CoreError;

/// Storage operation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} '{id}' is leased by another worker")]
    AlreadyLeased { kind: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => CoreError::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => CoreError::Validation(err.to_string()),
            StoreError::AlreadyLeased { .. } => CoreError::Conflict(err.to_string()),
            StoreError::Backend(_) => CoreError::Transient(err.to_string()),
        }
    }
}
