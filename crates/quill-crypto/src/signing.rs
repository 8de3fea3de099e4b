use ed25519_dalek::{Signer, Verifier};

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};

/// Multibase prefix for base58btc.
const MULTIBASE_BASE58BTC: char = 'z';

/// Ed25519 signature (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!("signature must be 64 bytes, got {}", bytes.len()))
        })?;
        Ok(Self {
            inner: ed25519_dalek::Signature::from_bytes(&bytes_arr),
        })
    }

    /// Multibase (base58btc) form used in linked-data proofs.
    pub fn to_multibase(&self) -> String {
        format!("{MULTIBASE_BASE58BTC}{}", bs58::encode(self.to_bytes()).into_string())
    }

    pub fn from_multibase(encoded: &str) -> Result<Self, CryptoError> {
        let body = encoded
            .strip_prefix(MULTIBASE_BASE58BTC)
            .ok_or_else(|| CryptoError::InvalidInput("proof value is not base58btc multibase".into()))?;
        let bytes = bs58::decode(body)
            .into_vec()
            .map_err(|e| CryptoError::InvalidInput(format!("invalid base58: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

/// Sign a message using Ed25519.
pub fn sign(message: &[u8], keypair: &KeyPair) -> Signature {
    Signature {
        inner: keypair.signing_key().sign(message),
    }
}

/// Verify an Ed25519 signature.
pub fn verify(message: &[u8], signature: &Signature, pubkey: &PublicKey) -> Result<(), CryptoError> {
    pubkey
        .verifying_key()
        .verify(message, &signature.inner)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}
