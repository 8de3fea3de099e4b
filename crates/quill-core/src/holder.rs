use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::CredentialFormat;
use crate::entity::{EntityMeta, EntityState, StatefulEntity};
use crate::error::CoreError;

/// States of a holder-side credential request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HolderRequestState {
    Created,
    /// Sending the request to the issuer.
    Requesting,
    /// The issuer acknowledged the request with its own process id.
    Requested,
    /// Credentials received and stored. Final state.
    Issued,
    /// Final state.
    Error,
}

impl EntityState for HolderRequestState {
    const KIND: &'static str = "holder credential request";

    fn code(&self) -> i32 {
        match self {
            Self::Created => 100,
            Self::Requesting => 200,
            Self::Requested => 300,
            Self::Issued => 400,
            Self::Error => 500,
        }
    }

    fn from_code(code: i32) -> Result<Self, CoreError> {
        match code {
            100 => Ok(Self::Created),
            200 => Ok(Self::Requesting),
            300 => Ok(Self::Requested),
            400 => Ok(Self::Issued),
            500 => Ok(Self::Error),
            _ => Err(CoreError::InvalidStateCode { kind: Self::KIND, code }),
        }
    }

    fn is_final(&self) -> bool {
        matches!(self, Self::Issued | Self::Error)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Requesting)
            | (Self::Requesting, Self::Requested)
            | (Self::Requested, Self::Issued) => true,
            (from, Self::Error) => !from.is_final(),
            _ => false,
        }
    }

    fn error_state() -> Self {
        Self::Error
    }
}

impl fmt::Display for HolderRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Requesting => write!(f, "REQUESTING"),
            Self::Requested => write!(f, "REQUESTED"),
            Self::Issued => write!(f, "ISSUED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A holder's outstanding request for credentials from one issuer.
/// The entity id is the holder pid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderCredentialRequest {
    #[serde(flatten)]
    pub meta: EntityMeta<HolderRequestState>,
    pub participant_context_id: String,
    pub issuer_did: String,
    pub types_and_formats: BTreeMap<String, CredentialFormat>,
    #[serde(default)]
    pub issuer_pid: Option<String>,
}

impl HolderCredentialRequest {
    pub fn new(
        holder_pid: impl Into<String>,
        participant_context_id: impl Into<String>,
        issuer_did: impl Into<String>,
        types_and_formats: BTreeMap<String, CredentialFormat>,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let issuer_did = issuer_did.into();
        if issuer_did.trim().is_empty() {
            return Err(CoreError::Validation("issuer DID is required".into()));
        }
        if types_and_formats.is_empty() {
            return Err(CoreError::Validation(
                "at least one credential type must be requested".into(),
            ));
        }
        Ok(Self {
            meta: EntityMeta::new(holder_pid, HolderRequestState::Created, now),
            participant_context_id: participant_context_id.into(),
            issuer_did,
            types_and_formats,
            issuer_pid: None,
        })
    }

    pub fn holder_pid(&self) -> &str {
        &self.meta.id
    }
}

impl StatefulEntity for HolderCredentialRequest {
    type State = HolderRequestState;

    fn meta(&self) -> &EntityMeta<HolderRequestState> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta<HolderRequestState> {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types() -> BTreeMap<String, CredentialFormat> {
        BTreeMap::from([("MembershipCredential".to_string(), CredentialFormat::Vc1Jwt)])
    }

    #[test]
    fn test_new_request_starts_created() {
        let request = HolderCredentialRequest::new("hpid", "holder", "did:web:issuer", types(), Utc::now()).unwrap();
        assert_eq!(request.state(), HolderRequestState::Created);
        assert_eq!(request.holder_pid(), "hpid");
        assert!(request.issuer_pid.is_none());
    }

    #[test]
    fn test_new_request_requires_types() {
        let err = HolderCredentialRequest::new("hpid", "holder", "did:web:issuer", BTreeMap::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_new_request_requires_issuer() {
        assert!(HolderCredentialRequest::new("hpid", "holder", "", types(), Utc::now()).is_err());
    }

    #[test]
    fn test_transitions() {
        use HolderRequestState::*;
        assert!(Created.can_transition_to(Requesting));
        assert!(Requesting.can_transition_to(Requested));
        assert!(Requested.can_transition_to(Issued));
        assert!(Requested.can_transition_to(Error));
        assert!(!Created.can_transition_to(Issued));
        assert!(!Issued.can_transition_to(Error));
        assert!(!Error.can_transition_to(Created));
    }

    #[test]
    fn test_codes() {
        assert_eq!(HolderRequestState::from_code(300).unwrap(), HolderRequestState::Requested);
        assert!(matches!(
            HolderRequestState::from_code(0),
            Err(CoreError::InvalidStateCode { code: 0, .. })
        ));
    }
}
