use quill_core::{CoreError, CredentialFormat};
use quill_crypto::CryptoError;
use quill_store::StoreError;

use crate::attestation::AttestationError;
use crate::rules::RuleError;

/// Issuer-side errors.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("required claim '{0}' is missing")]
    MissingClaim(String),

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("no generator found for format {0}")]
    GeneratorNotFound(CredentialFormat),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("credential delivery failed: {0}")]
    Delivery(String),

    #[error("status list error: {0}")]
    StatusList(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IssuanceError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

impl From<IssuanceError> for CoreError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::Attestation(e) => e.into(),
            IssuanceError::Rule(e) => e.into(),
            IssuanceError::MissingClaim(_) | IssuanceError::InvalidClaims(_) | IssuanceError::BadRequest(_) => {
                CoreError::Validation(err.to_string())
            }
            IssuanceError::GeneratorNotFound(_) => CoreError::Configuration(err.to_string()),
            IssuanceError::NotFound { .. } => CoreError::NotFound(err.to_string()),
            IssuanceError::Unauthorized(msg) => CoreError::Unauthorized(msg),
            IssuanceError::Delivery(msg) => CoreError::Transient(msg),
            IssuanceError::StatusList(msg) => CoreError::Validation(msg),
            IssuanceError::Crypto(e) => e.into(),
            IssuanceError::Store(e) => e.into(),
            IssuanceError::Core(e) => e,
        }
    }
}
