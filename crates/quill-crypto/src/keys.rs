use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// Ed25519 key pair for signing operations.
/// Private key material is zeroized on drop.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair using OS-provided entropy.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create a key pair from raw seed bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        let kp = Self::from_seed(&seed);
        seed.zeroize();
        Ok(kp)
    }

    /// Decode a hex-encoded seed, the form key pairs are kept in the vault.
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_seed.trim())
                .map_err(|e| CryptoError::InvalidInput(format!("invalid hex seed: {e}")))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Hex-encoded seed, wrapped so the copy is wiped when dropped.
    pub fn to_hex_seed(&self) -> Zeroizing<String> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(hex::encode(&*seed))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verification operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let verifying_key = VerifyingKey::from_bytes(&bytes_arr)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid public key: {e}")))?;
        Ok(Self { verifying_key })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str).map_err(|e| CryptoError::InvalidInput(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}
