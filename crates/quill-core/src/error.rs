/// Engine-wide error taxonomy.
///
/// Every crate defines its own error enum and converts into `CoreError` at the
/// boundary where the state-machine runtime decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid {kind} state code: {code}")]
    InvalidStateCode { kind: &'static str, code: i32 },

    #[error("invalid {kind} state transition from {from} to {to}")]
    InvalidStateTransition {
        kind: &'static str,
        from: String,
        to: String,
    },
}

impl CoreError {
    /// Whether a failed operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Transient(_))
    }

    /// Short, stable name of the error class, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Transient(_) => "transient",
            Self::Configuration(_) => "configuration",
            Self::InvalidStateCode { .. } => "invalid_state_code",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("malformed JSON: {err}"))
    }
}
