//! Format-pluggable credential generation.
//!
//! The registry resolves everything a generator needs (issuer and holder
//! DIDs, the participant's active signing key) and dispatches to the
//! generator registered for the requested format.

mod jwt;
mod ldp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use quill_core::claims::Claims;
use quill_core::{
    CredentialDefinition, CredentialFormat, CredentialStatus, CredentialSubject, Holder, ParticipantContext,
    VerifiableCredential, VerifiableCredentialContainer,
};
use quill_crypto::{ParticipantKeys, PublicKey};
use quill_store::Repository;
use serde_json::Value;

use crate::error::IssuanceError;
use crate::mapping::map_claims;

pub use jwt::{decode_jwt_credential, jwt_key_id, verify_jwt_credential, JwtCredentialGenerator};
pub use ldp::{
    decode_ldp_credential, ldp_verification_method, verify_ldp_credential, LdpCredentialGenerator, PROOF_TYPE,
};

/// Everything a generator needs to build and sign one credential.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams<'a> {
    pub definition: &'a CredentialDefinition,
    pub private_key_alias: &'a str,
    pub public_key_id: &'a str,
    pub issuer_id: &'a str,
    pub holder_did: &'a str,
    /// Claims after mapping; must carry `credentialSubject`.
    pub claims: &'a Claims,
}

/// Generates and signs credentials in one format.
#[async_trait]
pub trait CredentialGenerator: Send + Sync {
    fn format(&self) -> CredentialFormat;

    async fn generate_credential(
        &self,
        params: &GenerationParams<'_>,
    ) -> Result<VerifiableCredentialContainer, IssuanceError>;

    /// Sign an already built credential, returning its raw form.
    async fn sign_credential(
        &self,
        credential: &VerifiableCredential,
        private_key_alias: &str,
        public_key_id: &str,
    ) -> Result<String, IssuanceError>;
}

/// One credential to generate: the definition and the requested format.
#[derive(Debug, Clone)]
pub struct CredentialGenerationRequest {
    pub definition: CredentialDefinition,
    pub format: CredentialFormat,
}

impl CredentialGenerationRequest {
    pub fn new(definition: CredentialDefinition, format: CredentialFormat) -> Self {
        Self { definition, format }
    }
}

/// Generators keyed by format, plus the directories they draw DIDs and keys from.
pub struct CredentialGeneratorRegistry {
    generators: HashMap<CredentialFormat, Arc<dyn CredentialGenerator>>,
    participants: Arc<dyn Repository<ParticipantContext>>,
    holders: Arc<dyn Repository<Holder>>,
    keys: ParticipantKeys,
}

impl CredentialGeneratorRegistry {
    pub fn new(
        participants: Arc<dyn Repository<ParticipantContext>>,
        holders: Arc<dyn Repository<Holder>>,
        keys: ParticipantKeys,
    ) -> Self {
        Self {
            generators: HashMap::new(),
            participants,
            holders,
            keys,
        }
    }

    pub fn register(&mut self, generator: Arc<dyn CredentialGenerator>) {
        let format = generator.format();
        tracing::info!(format = %format, "registering credential generator");
        self.generators.insert(format, generator);
    }

    pub fn formats(&self) -> Vec<CredentialFormat> {
        let mut formats: Vec<_> = self.generators.keys().copied().collect();
        formats.sort();
        formats
    }

    fn generator(&self, format: CredentialFormat) -> Result<&Arc<dyn CredentialGenerator>, IssuanceError> {
        self.generators
            .get(&format)
            .ok_or(IssuanceError::GeneratorNotFound(format))
    }

    fn issuer_did(&self, participant_context_id: &str) -> Result<String, IssuanceError> {
        self.participants
            .find_by_id(participant_context_id)?
            .map(|p| p.did)
            .ok_or_else(|| IssuanceError::not_found("participant context", participant_context_id))
    }

    /// Map the claims, then generate one credential for `holder_id`.
    pub async fn generate_credential(
        &self,
        participant_context_id: &str,
        holder_id: &str,
        request: &CredentialGenerationRequest,
        claims: &Claims,
    ) -> Result<VerifiableCredentialContainer, IssuanceError> {
        let mapped = map_claims(&request.definition.mappings, claims)?;
        let generator = self.generator(request.format)?;

        let issuer_did = self.issuer_did(participant_context_id)?;
        let holder_did = self
            .holders
            .find_by_id(holder_id)?
            .map(|h| h.did)
            .ok_or_else(|| IssuanceError::not_found("holder", holder_id))?;
        let key = self.keys.active_key_pair(participant_context_id)?;

        let container = generator
            .generate_credential(&GenerationParams {
                definition: &request.definition,
                private_key_alias: &key.private_key_alias,
                public_key_id: &key.key_id,
                issuer_id: &issuer_did,
                holder_did: &holder_did,
                claims: &mapped,
            })
            .await?;

        tracing::info!(
            participant = %participant_context_id,
            holder = %holder_id,
            credential_id = %container.credential.id,
            credential_type = %request.definition.credential_type,
            format = %request.format,
            "credential generated"
        );
        Ok(container)
    }

    /// Generate every requested credential; the first failure aborts.
    pub async fn generate_credentials(
        &self,
        participant_context_id: &str,
        holder_id: &str,
        requests: &[CredentialGenerationRequest],
        claims: &Claims,
    ) -> Result<Vec<VerifiableCredentialContainer>, IssuanceError> {
        let mut containers = Vec::with_capacity(requests.len());
        for request in requests {
            containers.push(
                self.generate_credential(participant_context_id, holder_id, request, claims)
                    .await?,
            );
        }
        Ok(containers)
    }

    /// Re-sign a credential whose content changed after generation.
    pub async fn sign_credential(
        &self,
        participant_context_id: &str,
        credential: &VerifiableCredential,
        format: CredentialFormat,
    ) -> Result<VerifiableCredentialContainer, IssuanceError> {
        let generator = self.generator(format)?;
        let key = self.keys.active_key_pair(participant_context_id)?;
        let raw = generator
            .sign_credential(credential, &key.private_key_alias, &key.key_id)
            .await?;
        Ok(VerifiableCredentialContainer::new(raw, format, credential.clone()))
    }
}

/// Build the unsigned credential shared by all formats.
pub(crate) fn build_credential(params: &GenerationParams<'_>, now: DateTime<Utc>) -> Result<VerifiableCredential, IssuanceError> {
    let mut subject_claims = match params.claims.get("credentialSubject") {
        Some(Value::Object(subject)) => subject.clone(),
        Some(_) => return Err(IssuanceError::InvalidClaims("credentialSubject must be an object".into())),
        None => return Err(IssuanceError::InvalidClaims("missing credentialSubject in claims".into())),
    };
    subject_claims.remove("id");

    let definition = params.definition;
    let mut credential = VerifiableCredential::new(&definition.credential_type, params.issuer_id, now)
        .with_expiration(now + Duration::seconds(definition.validity))
        .with_subject(CredentialSubject {
            id: Some(params.holder_did.to_string()),
            claims: subject_claims,
        });
    credential.data_model = definition.data_model;

    if let Some(status) = params.claims.get("credentialStatus") {
        let status = CredentialStatus::from_json(status)
            .map_err(|e| IssuanceError::InvalidClaims(format!("credentialStatus: {e}")))?;
        credential = credential.with_status(status);
    }
    Ok(credential)
}

/// Decode a raw credential of a known format without checking its proof.
pub fn decode_credential(raw: &str, format: CredentialFormat) -> Result<VerifiableCredentialContainer, IssuanceError> {
    let credential = match format {
        CredentialFormat::Vc1Jwt | CredentialFormat::Vc2Jose => decode_jwt_credential(raw)?,
        CredentialFormat::Vc1Ld => decode_ldp_credential(raw)?,
        CredentialFormat::Vc2SdJwt => {
            return Err(IssuanceError::InvalidClaims(format!("cannot decode {format} credentials")))
        }
    };
    Ok(VerifiableCredentialContainer::new(raw, format, credential))
}

/// The key a credential says it was signed with: the JWT `kid` or the
/// proof's `verificationMethod`.
pub fn verification_method(raw: &str, format: CredentialFormat) -> Result<String, IssuanceError> {
    match format {
        CredentialFormat::Vc1Jwt | CredentialFormat::Vc2Jose => jwt_key_id(raw),
        CredentialFormat::Vc1Ld => ldp_verification_method(raw),
        CredentialFormat::Vc2SdJwt => Err(IssuanceError::InvalidClaims(format!("cannot verify {format} credentials"))),
    }
}

/// Like `decode_credential`, with the signature checked against `public_key`.
pub fn verify_credential(
    raw: &str,
    format: CredentialFormat,
    public_key: &PublicKey,
) -> Result<VerifiableCredentialContainer, IssuanceError> {
    let credential = match format {
        CredentialFormat::Vc1Jwt | CredentialFormat::Vc2Jose => verify_jwt_credential(raw, public_key)?,
        CredentialFormat::Vc1Ld => verify_ldp_credential(raw, public_key)?,
        CredentialFormat::Vc2SdJwt => {
            return Err(IssuanceError::InvalidClaims(format!("cannot verify {format} credentials")))
        }
    };
    Ok(VerifiableCredentialContainer::new(raw, format, credential))
}
