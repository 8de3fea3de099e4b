use quill_core::CoreError;
use quill_crypto::CryptoError;
use quill_issuance::IssuanceError;
use quill_store::StoreError;

/// Holder-side errors.
#[derive(Debug, thiserror::Error)]
pub enum HolderError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The issuer could not be reached or answered with a server error.
    #[error("issuer unavailable: {0}")]
    Issuer(String),

    #[error("issuer rejected the request: {0}")]
    IssuerRejected(String),

    #[error("request '{holder_pid}' timed out waiting for the issuer")]
    Timeout { holder_pid: String },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("status check failed: {0}")]
    StatusCheck(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl HolderError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

impl From<HolderError> for CoreError {
    fn from(err: HolderError) -> Self {
        match err {
            HolderError::NotFound { .. } => CoreError::NotFound(err.to_string()),
            HolderError::InvalidRequest(_) | HolderError::InvalidCredential(_) | HolderError::Timeout { .. } => {
                CoreError::Validation(err.to_string())
            }
            HolderError::Issuer(msg) | HolderError::StatusCheck(msg) => CoreError::Transient(msg),
            HolderError::IssuerRejected(msg) => CoreError::Unauthorized(msg),
            HolderError::Crypto(e) => e.into(),
            HolderError::Store(e) => e.into(),
            HolderError::Issuance(e) => e.into(),
            HolderError::Core(e) => e,
        }
    }
}
