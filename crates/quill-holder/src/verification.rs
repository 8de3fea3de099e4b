//! Signature checks on credentials an issuer delivers.

use std::sync::Arc;

use async_trait::async_trait;
use quill_core::{CredentialFormat, Criterion, ParticipantContext, QuerySpec, VerifiableCredentialContainer};
use quill_crypto::{ParticipantKeys, PublicKey};
use quill_issuance::{verification_method, verify_credential};
use quill_store::Repository;

use crate::error::HolderError;

/// Looks up the public key behind a verification method (`did#key`).
#[async_trait]
pub trait IssuerKeyResolver: Send + Sync {
    async fn resolve_key(&self, verification_method: &str) -> Result<PublicKey, HolderError>;
}

/// Resolves keys of the participants registered with this node.
pub struct ParticipantKeyResolver {
    participants: Arc<dyn Repository<ParticipantContext>>,
    keys: ParticipantKeys,
}

impl ParticipantKeyResolver {
    pub fn new(participants: Arc<dyn Repository<ParticipantContext>>, keys: ParticipantKeys) -> Self {
        Self { participants, keys }
    }
}

#[async_trait]
impl IssuerKeyResolver for ParticipantKeyResolver {
    async fn resolve_key(&self, verification_method: &str) -> Result<PublicKey, HolderError> {
        let (did, key_id) = verification_method.split_once('#').ok_or_else(|| {
            HolderError::InvalidCredential(format!("verification method '{verification_method}' has no key fragment"))
        })?;
        let participant = self
            .participants
            .query(&QuerySpec::new(vec![Criterion::eq("did", did)]))?
            .into_iter()
            .next()
            .ok_or_else(|| HolderError::InvalidCredential(format!("no key material known for '{did}'")))?;
        Ok(self.keys.verification_key(&participant.id, key_id)?)
    }
}

/// Verifies a delivered credential before it is stored.
pub struct CredentialVerifier {
    keys: Arc<dyn IssuerKeyResolver>,
}

impl CredentialVerifier {
    pub fn new(keys: Arc<dyn IssuerKeyResolver>) -> Self {
        Self { keys }
    }

    /// The key must belong to `issuer_did`, the signature must hold under it
    /// and the credential must name `issuer_did` as its issuer.
    pub async fn verify(
        &self,
        issuer_did: &str,
        raw: &str,
        format: CredentialFormat,
    ) -> Result<VerifiableCredentialContainer, HolderError> {
        let method = verification_method(raw, format)?;
        if method.split_once('#').map(|(did, _)| did) != Some(issuer_did) {
            return Err(HolderError::InvalidCredential(format!(
                "credential is signed with '{method}', which is not a key of '{issuer_did}'"
            )));
        }
        let key = self.keys.resolve_key(&method).await?;
        let container = verify_credential(raw, format, &key).map_err(|e| {
            HolderError::InvalidCredential(format!("credential from '{issuer_did}' failed verification: {e}"))
        })?;
        if container.credential.issuer != issuer_did {
            return Err(HolderError::InvalidCredential(format!(
                "credential '{}' was issued by '{}', expected '{issuer_did}'",
                container.credential.id, container.credential.issuer
            )));
        }
        Ok(container)
    }
}
