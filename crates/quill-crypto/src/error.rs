use quill_core::CoreError;

/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("no secret stored under alias '{0}'")]
    SecretNotFound(String),

    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    #[error("no active key pair for participant '{0}'")]
    NoActiveKey(String),

    #[error("unknown verification key '{0}'")]
    UnknownKey(String),

    #[error("key pair store error: {0}")]
    KeyStore(#[from] quill_store::StoreError),
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::SecretNotFound(alias) => {
                CoreError::NotFound(format!("no secret stored under alias '{alias}'"))
            }
            CryptoError::VaultUnavailable(msg) => CoreError::Transient(format!("vault unavailable: {msg}")),
            CryptoError::SignatureVerificationFailed => {
                CoreError::Unauthorized("signature verification failed".into())
            }
            CryptoError::NoActiveKey(participant) => {
                CoreError::Configuration(format!("no active key pair for participant '{participant}'"))
            }
            CryptoError::UnknownKey(key) => CoreError::Unauthorized(format!("unknown verification key '{key}'")),
            CryptoError::KeyStore(store) => store.into(),
            other => CoreError::Validation(other.to_string()),
        }
    }
}
