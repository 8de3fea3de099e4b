use std::sync::Arc;

use async_trait::async_trait;
use quill_core::{Clock, CredentialFormat, VerifiableCredential, VerifiableCredentialContainer};
use quill_crypto::{compose_kid, resolve_key_pair, sign, verify, PublicKey, Signature, Vault};
use serde_json::{json, Value};

use super::{build_credential, CredentialGenerator, GenerationParams};
use crate::error::IssuanceError;

pub const PROOF_TYPE: &str = "Ed25519Signature2020";

/// `VC1_0_LD`: the credential as JSON with an embedded Ed25519 proof.
///
/// The proof signs the sorted-key serialization of the credential (minus
/// its proof) together with the proof options; `proofValue` is multibase
/// base58btc.
pub struct LdpCredentialGenerator {
    vault: Arc<dyn Vault>,
    clock: Arc<dyn Clock>,
}

impl LdpCredentialGenerator {
    pub fn new(vault: Arc<dyn Vault>, clock: Arc<dyn Clock>) -> Self {
        Self { vault, clock }
    }
}

fn signing_input(document: &Value, proof_options: &Value) -> Result<Vec<u8>, IssuanceError> {
    serde_json::to_vec(&json!({"document": document, "proof": proof_options}))
        .map_err(|e| IssuanceError::InvalidClaims(format!("credential is not serializable: {e}")))
}

#[async_trait]
impl CredentialGenerator for LdpCredentialGenerator {
    fn format(&self) -> CredentialFormat {
        CredentialFormat::Vc1Ld
    }

    async fn generate_credential(
        &self,
        params: &GenerationParams<'_>,
    ) -> Result<VerifiableCredentialContainer, IssuanceError> {
        let credential = build_credential(params, self.clock.now())?;
        let raw = self
            .sign_credential(&credential, params.private_key_alias, params.public_key_id)
            .await?;
        Ok(VerifiableCredentialContainer::new(raw, CredentialFormat::Vc1Ld, credential))
    }

    async fn sign_credential(
        &self,
        credential: &VerifiableCredential,
        private_key_alias: &str,
        public_key_id: &str,
    ) -> Result<String, IssuanceError> {
        let key = resolve_key_pair(self.vault.as_ref(), private_key_alias).await?;
        let mut document = credential.to_json();
        let mut proof = json!({
            "type": PROOF_TYPE,
            "created": self.clock.now().to_rfc3339(),
            "verificationMethod": compose_kid(&credential.issuer, public_key_id),
            "proofPurpose": "assertionMethod",
        });

        let signature = sign(&signing_input(&document, &proof)?, &key);
        proof["proofValue"] = json!(signature.to_multibase());
        document["proof"] = proof;

        serde_json::to_string(&document)
            .map_err(|e| IssuanceError::InvalidClaims(format!("credential is not serializable: {e}")))
    }
}

fn parse(raw: &str) -> Result<Value, IssuanceError> {
    serde_json::from_str(raw).map_err(|e| IssuanceError::InvalidClaims(format!("credential is not JSON: {e}")))
}

/// The `verificationMethod` of the credential's proof.
pub fn ldp_verification_method(raw: &str) -> Result<String, IssuanceError> {
    parse(raw)?
        .get("proof")
        .and_then(|proof| proof.get("verificationMethod"))
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| IssuanceError::InvalidClaims("proof has no verificationMethod".into()))
}

/// Parse a linked-data credential without checking its proof.
pub fn decode_ldp_credential(raw: &str) -> Result<VerifiableCredential, IssuanceError> {
    Ok(VerifiableCredential::from_json(&parse(raw)?)?)
}

/// Check the embedded proof against `public_key` and return the credential.
pub fn verify_ldp_credential(raw: &str, public_key: &PublicKey) -> Result<VerifiableCredential, IssuanceError> {
    let mut document = parse(raw)?;
    let mut proof = document
        .as_object_mut()
        .and_then(|doc| doc.remove("proof"))
        .ok_or_else(|| IssuanceError::InvalidClaims("credential has no proof".into()))?;
    let proof_value = proof
        .as_object_mut()
        .and_then(|p| p.remove("proofValue"))
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| IssuanceError::InvalidClaims("proof has no proofValue".into()))?;
    if proof.get("type").and_then(Value::as_str) != Some(PROOF_TYPE) {
        return Err(IssuanceError::InvalidClaims(format!("proof type must be {PROOF_TYPE}")));
    }

    let signature = Signature::from_multibase(&proof_value)?;
    verify(&signing_input(&document, &proof)?, &signature, public_key)?;
    Ok(VerifiableCredential::from_json(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::membership_definition;
    use chrono::Utc;
    use quill_core::SystemClock;
    use quill_crypto::{generate_key_pair, InMemoryVault};

    async fn generate() -> (VerifiableCredentialContainer, PublicKey) {
        let vault = Arc::new(InMemoryVault::new());
        let public_key = generate_key_pair(vault.as_ref(), "alias").await.unwrap();
        let generator = LdpCredentialGenerator::new(vault, Arc::new(SystemClock));
        let def = membership_definition();
        let claims = json!({"credentialSubject": {"level": "gold"}}).as_object().cloned().unwrap();
        let container = generator
            .generate_credential(&GenerationParams {
                definition: &def,
                private_key_alias: "alias",
                public_key_id: "did:web:issuer#key-1",
                issuer_id: "did:web:issuer",
                holder_did: "did:web:holder",
                claims: &claims,
            })
            .await
            .unwrap();
        (container, public_key)
    }

    #[tokio::test]
    async fn test_proof_verifies() {
        let (container, public_key) = generate().await;
        let verified = verify_ldp_credential(&container.raw_vc, &public_key).unwrap();
        assert_eq!(verified.id, container.credential.id);

        let raw: Value = serde_json::from_str(&container.raw_vc).unwrap();
        assert_eq!(raw["proof"]["type"], PROOF_TYPE);
        assert_eq!(raw["proof"]["verificationMethod"], "did:web:issuer#key-1");
        assert!(raw["proof"]["proofValue"].as_str().unwrap().starts_with('z'));
    }

    #[tokio::test]
    async fn test_tampered_credential_rejected() {
        let (container, public_key) = generate().await;
        let tampered = container.raw_vc.replace("gold", "platinum");
        assert!(matches!(
            verify_ldp_credential(&tampered, &public_key),
            Err(IssuanceError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_ignores_proof() {
        let (container, _) = generate().await;
        let decoded = decode_ldp_credential(&container.raw_vc).unwrap();
        assert_eq!(decoded.subject_id(), Some("did:web:holder"));
        assert!(decoded.issuance_date <= Utc::now());
    }
}
