use std::sync::Arc;

use async_trait::async_trait;
use quill_core::{Clock, CredentialFormat, VerifiableCredential, VerifiableCredentialContainer};
use quill_crypto::{compose_kid, decode_unverified, resolve_key_pair, sign_jwt, verify_jwt, JwsHeader, PublicKey, Vault};
use serde_json::{json, Value};

use super::{build_credential, CredentialGenerator, GenerationParams};
use crate::error::IssuanceError;

/// `VC1_0_JWT`: the credential travels in the `vc` claim of an EdDSA-signed JWT.
pub struct JwtCredentialGenerator {
    vault: Arc<dyn Vault>,
    clock: Arc<dyn Clock>,
}

impl JwtCredentialGenerator {
    pub fn new(vault: Arc<dyn Vault>, clock: Arc<dyn Clock>) -> Self {
        Self { vault, clock }
    }
}

#[async_trait]
impl CredentialGenerator for JwtCredentialGenerator {
    fn format(&self) -> CredentialFormat {
        CredentialFormat::Vc1Jwt
    }

    async fn generate_credential(
        &self,
        params: &GenerationParams<'_>,
    ) -> Result<VerifiableCredentialContainer, IssuanceError> {
        let credential = build_credential(params, self.clock.now())?;
        let raw = self
            .sign_credential(&credential, params.private_key_alias, params.public_key_id)
            .await?;
        Ok(VerifiableCredentialContainer::new(raw, CredentialFormat::Vc1Jwt, credential))
    }

    async fn sign_credential(
        &self,
        credential: &VerifiableCredential,
        private_key_alias: &str,
        public_key_id: &str,
    ) -> Result<String, IssuanceError> {
        let key = resolve_key_pair(self.vault.as_ref(), private_key_alias).await?;
        let issuer = credential.issuer.as_str();

        let mut claims = json!({
            "iss": issuer,
            "sub": credential.subject_id().unwrap_or(issuer),
            "iat": self.clock.now().timestamp(),
            "nbf": credential.issuance_date.timestamp(),
            "jti": uuid::Uuid::now_v7().to_string(),
            "vc": credential.to_json(),
        });
        if let Some(exp) = credential.expiration_date {
            claims["exp"] = json!(exp.timestamp());
        }

        let header = JwsHeader::eddsa(compose_kid(issuer, public_key_id));
        Ok(sign_jwt(&header, &claims, &key)?)
    }
}

fn vc_claim(claims: &Value) -> Result<VerifiableCredential, IssuanceError> {
    let vc = claims
        .get("vc")
        .ok_or_else(|| IssuanceError::InvalidClaims("JWT has no 'vc' claim".into()))?;
    Ok(VerifiableCredential::from_json(vc)?)
}

/// Read the credential out of a JWT's `vc` claim. The signature is not checked.
pub fn decode_jwt_credential(token: &str) -> Result<VerifiableCredential, IssuanceError> {
    let (_, claims) = decode_unverified(token)?;
    vc_claim(&claims)
}

/// Check the JWT signature against `public_key`, then read the `vc` claim.
pub fn verify_jwt_credential(token: &str, public_key: &PublicKey) -> Result<VerifiableCredential, IssuanceError> {
    vc_claim(&verify_jwt(token, public_key)?)
}

/// The `kid` the token names in its header.
pub fn jwt_key_id(token: &str) -> Result<String, IssuanceError> {
    let (header, _) = decode_unverified(token)?;
    header
        .kid
        .ok_or_else(|| IssuanceError::InvalidClaims("JWT header has no 'kid'".into()))
}
