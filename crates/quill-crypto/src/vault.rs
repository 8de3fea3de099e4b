use async_trait::async_trait;
use dashmap::DashMap;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};

/// Secret storage addressed by alias. Secrets never appear in logs.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn resolve_secret(&self, alias: &str) -> Result<Zeroizing<String>, CryptoError>;

    async fn store_secret(&self, alias: &str, secret: Zeroizing<String>) -> Result<(), CryptoError>;

    async fn delete_secret(&self, alias: &str) -> Result<(), CryptoError>;
}

/// Load the signing key stored under `alias`.
pub async fn resolve_key_pair(vault: &dyn Vault, alias: &str) -> Result<KeyPair, CryptoError> {
    let seed = vault.resolve_secret(alias).await?;
    KeyPair::from_hex_seed(&seed)
}

/// Generate a fresh key pair, keep its seed under `alias`, return the public half.
pub async fn generate_key_pair(vault: &dyn Vault, alias: &str) -> Result<PublicKey, CryptoError> {
    let kp = KeyPair::generate();
    vault.store_secret(alias, kp.to_hex_seed()).await?;
    tracing::info!(alias = %alias, public_key = %kp.public_key().to_hex(), "generated signing key");
    Ok(kp.public_key())
}

/// Process-local vault. Contents are wiped from memory when removed or dropped.
#[derive(Default)]
pub struct InMemoryVault {
    secrets: DashMap<String, Zeroizing<String>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl Vault for InMemoryVault {
    async fn resolve_secret(&self, alias: &str) -> Result<Zeroizing<String>, CryptoError> {
        self.secrets
            .get(alias)
            .map(|s| s.value().clone())
            .ok_or_else(|| CryptoError::SecretNotFound(alias.to_string()))
    }

    async fn store_secret(&self, alias: &str, secret: Zeroizing<String>) -> Result<(), CryptoError> {
        self.secrets.insert(alias.to_string(), secret);
        Ok(())
    }

    async fn delete_secret(&self, alias: &str) -> Result<(), CryptoError> {
        self.secrets
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| CryptoError::SecretNotFound(alias.to_string()))
    }
}
