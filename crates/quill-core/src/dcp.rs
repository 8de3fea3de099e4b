//! DCP message bodies exchanged between holder and issuer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credential::CredentialFormat;

/// One requested credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestSpecifier {
    pub credential_type: String,
    pub format: CredentialFormat,
}

/// Holder → issuer: please issue these credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestMessage {
    pub holder_pid: String,
    pub credentials: Vec<CredentialRequestSpecifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestResponse {
    pub issuer_pid: String,
}

/// Issuer-side status of a credential request, as reported to the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DcpRequestStatus {
    Received,
    Issued,
    Rejected,
}

impl fmt::Display for DcpRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "RECEIVED"),
            Self::Issued => write!(f, "ISSUED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestStatus {
    pub issuer_pid: String,
    pub holder_pid: String,
    pub status: DcpRequestStatus,
}

/// A secured credential in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEnvelope {
    pub credential_type: String,
    pub format: CredentialFormat,
    pub payload: String,
}

/// Issuer → holder: the issued credentials for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMessage {
    pub issuer_pid: String,
    pub holder_pid: String,
    pub status: DcpRequestStatus,
    pub credentials: Vec<CredentialEnvelope>,
}
