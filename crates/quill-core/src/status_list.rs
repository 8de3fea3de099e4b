//! Bitstring status lists: a compact bit array in which bit `i` flags the
//! credential carrying status list index `i`.
//!
//! The `encodedList` wire form is GZIP-compressed, then multibase base64url
//! (the `u` prefix, no padding).

use std::io::{Read, Write};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use crate::credential::{StatusPurpose, VC_TYPE, W3C_V2_CONTEXT};
use crate::error::CoreError;

/// Minimum list length recommended for herd privacy (16 KiB of bits).
pub const DEFAULT_STATUS_LIST_SIZE: usize = 131_072;

/// Multibase prefix for base64url without padding.
const MULTIBASE_BASE64URL: char = 'u';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitString {
    bytes: Vec<u8>,
    len: usize,
}

impl BitString {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, index: usize) -> Result<(), CoreError> {
        if index >= self.len {
            return Err(CoreError::Validation(format!(
                "status list index {index} out of range (size {})",
                self.len
            )));
        }
        Ok(())
    }

    /// Bit 0 is the most significant bit of the first byte.
    pub fn get(&self, index: usize) -> Result<bool, CoreError> {
        self.check(index)?;
        Ok(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    pub fn set(&mut self, index: usize, value: bool) -> Result<(), CoreError> {
        self.check(index)?;
        let mask = 0x80 >> (index % 8);
        if value {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, CoreError> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&self.bytes)
            .map_err(|e| CoreError::Validation(format!("status list compression failed: {e}")))?;
        let compressed = gz
            .finish()
            .map_err(|e| CoreError::Validation(format!("status list compression failed: {e}")))?;
        Ok(format!("{MULTIBASE_BASE64URL}{}", URL_SAFE_NO_PAD.encode(compressed)))
    }

    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let body = encoded.strip_prefix(MULTIBASE_BASE64URL).ok_or_else(|| {
            CoreError::Validation(format!(
                "status list is not multibase base64url (prefix '{}')",
                encoded.chars().next().unwrap_or(' ')
            ))
        })?;
        let compressed = URL_SAFE_NO_PAD
            .decode(body.trim_end_matches('='))
            .map_err(|e| CoreError::Validation(format!("invalid status list encoding: {e}")))?;
        let mut bytes = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut bytes)
            .map_err(|e| CoreError::Validation(format!("status list is not gzip compressed: {e}")))?;
        let len = bytes.len() * 8;
        Ok(Self { bytes, len })
    }
}

/// A published status list as seen by a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusList {
    pub url: String,
    pub purpose: StatusPurpose,
    pub bits: BitString,
}

impl StatusList {
    /// Render as an (unsecured) `BitstringStatusListCredential`.
    pub fn to_credential_json(&self, issuer: &str) -> Result<Value, CoreError> {
        Ok(json!({
            "@context": [W3C_V2_CONTEXT],
            "id": self.url,
            "type": [VC_TYPE, "BitstringStatusListCredential"],
            "issuer": issuer,
            "credentialSubject": {
                "id": format!("{}#list", self.url),
                "type": "BitstringStatusList",
                "statusPurpose": self.purpose.as_str(),
                "encodedList": self.bits.encode()?,
            }
        }))
    }

    pub fn from_credential_json(url: &str, value: &Value) -> Result<Self, CoreError> {
        let subject = value
            .get("credentialSubject")
            .ok_or_else(|| CoreError::Validation("status list credential has no credentialSubject".into()))?;
        let purpose = subject
            .get("statusPurpose")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Validation("status list has no statusPurpose".into()))?
            .parse()?;
        let encoded = subject
            .get("encodedList")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Validation("status list has no encodedList".into()))?;
        Ok(Self {
            url: url.to_string(),
            purpose,
            bits: BitString::decode(encoded)?,
        })
    }
}

/// Fetches status lists by their credential URL.
#[async_trait]
pub trait StatusListResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<StatusList, CoreError>;
}
