use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use quill_core::{Criterion, KeyPairResource, QuerySpec};
use quill_store::Repository;
use serde_json::json;

use crate::error::CryptoError;
use crate::jws::{sign_jwt, JwsHeader};
use crate::keys::{KeyPair, PublicKey};
use crate::vault::{resolve_key_pair, Vault};

/// Resolves a participant's signing key: the key pair record from the
/// directory, the private half from the vault.
#[derive(Clone)]
pub struct ParticipantKeys {
    key_pairs: Arc<dyn Repository<KeyPairResource>>,
    vault: Arc<dyn Vault>,
}

impl ParticipantKeys {
    pub fn new(key_pairs: Arc<dyn Repository<KeyPairResource>>, vault: Arc<dyn Vault>) -> Self {
        Self { key_pairs, vault }
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    /// The participant's default active key pair, or any active one.
    pub fn active_key_pair(&self, participant_context_id: &str) -> Result<KeyPairResource, CryptoError> {
        let active = self.key_pairs.query(&QuerySpec::new(vec![
            Criterion::eq("participantContextId", participant_context_id),
            Criterion::eq("active", true),
        ]))?;
        let chosen = active
            .iter()
            .find(|kp| kp.default_pair)
            .or_else(|| active.first())
            .cloned();
        chosen.ok_or_else(|| CryptoError::NoActiveKey(participant_context_id.to_string()))
    }

    /// Public half of one of the participant's active key pairs.
    pub fn verification_key(&self, participant_context_id: &str, key_id: &str) -> Result<PublicKey, CryptoError> {
        let resource = self
            .key_pairs
            .query(&QuerySpec::new(vec![
                Criterion::eq("participantContextId", participant_context_id),
                Criterion::eq("keyId", key_id),
                Criterion::eq("active", true),
            ]))?
            .into_iter()
            .next()
            .ok_or_else(|| CryptoError::UnknownKey(format!("{participant_context_id}/{key_id}")))?;
        PublicKey::from_hex(&resource.public_key)
    }

    pub async fn signing_key(&self, participant_context_id: &str) -> Result<(KeyPairResource, KeyPair), CryptoError> {
        let resource = self.active_key_pair(participant_context_id)?;
        let key = resolve_key_pair(self.vault.as_ref(), &resource.private_key_alias).await?;
        Ok((resource, key))
    }

    /// Generate a key pair, keep its seed in the vault and register it.
    pub async fn create_key_pair(
        &self,
        participant_context_id: &str,
        key_id: &str,
        default_pair: bool,
    ) -> Result<KeyPairResource, CryptoError> {
        let alias = format!("{participant_context_id}-{key_id}-alias");
        let kp = KeyPair::generate();
        self.vault.store_secret(&alias, kp.to_hex_seed()).await?;
        let resource = KeyPairResource {
            id: uuid::Uuid::now_v7().to_string(),
            participant_context_id: participant_context_id.to_string(),
            key_id: key_id.to_string(),
            private_key_alias: alias,
            public_key: kp.public_key().to_hex(),
            default_pair,
            active: true,
        };
        self.key_pairs.create(resource.clone())?;
        tracing::info!(
            participant = %participant_context_id,
            key_id = %key_id,
            default_pair,
            "key pair created"
        );
        Ok(resource)
    }

    /// A short-lived self-issued ID token (`iss` = `sub` = own DID).
    pub async fn self_issued_token(
        &self,
        participant_context_id: &str,
        own_did: &str,
        audience: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, CryptoError> {
        let (resource, key) = self.signing_key(participant_context_id).await?;
        let claims = json!({
            "iss": own_did,
            "sub": own_did,
            "aud": audience,
            "iat": now.timestamp(),
            "exp": (now + ttl).timestamp(),
            "jti": uuid::Uuid::now_v7().to_string(),
        });
        sign_jwt(&JwsHeader::eddsa(compose_kid(own_did, &resource.key_id)), &claims, &key)
    }
}

/// `did#key` unless `key_id` already carries the DID.
pub fn compose_kid(did: &str, key_id: &str) -> String {
    if key_id.starts_with(did) {
        key_id.to_string()
    } else {
        format!("{did}#{key_id}")
    }
}
