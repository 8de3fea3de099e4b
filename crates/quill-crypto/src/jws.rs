//! Compact JWS (RFC 7515) with EdDSA over Ed25519.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};
use crate::signing::{sign, verify, Signature};

pub const ALG_EDDSA: &str = "EdDSA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl JwsHeader {
    pub fn eddsa(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_EDDSA.into(),
            kid: Some(kid.into()),
            typ: Some("JWT".into()),
        }
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let bytes = serde_json::to_vec(value).map_err(|e| CryptoError::SigningError(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str, what: &str) -> Result<T, CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CryptoError::MalformedToken(format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| CryptoError::MalformedToken(format!("{what} is not JSON: {e}")))
}

/// Produce a signed compact JWS over `claims`.
pub fn sign_jwt(header: &JwsHeader, claims: &Value, keypair: &KeyPair) -> Result<String, CryptoError> {
    if header.alg != ALG_EDDSA {
        return Err(CryptoError::SigningError(format!("unsupported algorithm '{}'", header.alg)));
    }
    let signing_input = format!("{}.{}", encode_segment(header)?, encode_segment(claims)?);
    let signature = sign(signing_input.as_bytes(), keypair);
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes())))
}

fn split(token: &str) -> Result<(&str, &str, &str), CryptoError> {
    let mut parts = token.trim().split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => Ok((h, p, s)),
        _ => Err(CryptoError::MalformedToken("expected three dot-separated segments".into())),
    }
}

/// Decode header and claims without checking the signature.
pub fn decode_unverified(token: &str) -> Result<(JwsHeader, Value), CryptoError> {
    let (header, payload, _) = split(token)?;
    Ok((decode_segment(header, "header")?, decode_segment(payload, "payload")?))
}

/// Check the signature against `pubkey` and return the claims.
pub fn verify_jwt(token: &str, pubkey: &PublicKey) -> Result<Value, CryptoError> {
    let (header_b64, payload_b64, sig_b64) = split(token)?;
    let header: JwsHeader = decode_segment(header_b64, "header")?;
    if header.alg != ALG_EDDSA {
        return Err(CryptoError::MalformedToken(format!("unsupported algorithm '{}'", header.alg)));
    }
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|e| CryptoError::MalformedToken(format!("signature is not base64url: {e}")))?;
    let signature = Signature::from_bytes(&sig_bytes)?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    verify(signing_input.as_bytes(), &signature, pubkey)?;
    decode_segment(payload_b64, "payload")
}
