use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::claims::Claims;
use crate::credential::{CredentialFormat, DataModelVersion, VerifiableCredentialContainer};
use crate::entity::{EntityMeta, EntityState, StatefulEntity};
use crate::error::CoreError;

/// States of an issuer-side issuance process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceProcessState {
    /// Request accepted, awaiting attestation and generation.
    Submitted,
    /// Credentials generated, awaiting delivery.
    Approved,
    /// Credentials delivered to the holder. Final state.
    Delivered,
    /// Processing gave up. Final state.
    Errored,
}

impl EntityState for IssuanceProcessState {
    const KIND: &'static str = "issuance process";

    fn code(&self) -> i32 {
        match self {
            Self::Submitted => 100,
            Self::Approved => 200,
            Self::Delivered => 300,
            Self::Errored => 400,
        }
    }

    fn from_code(code: i32) -> Result<Self, CoreError> {
        match code {
            100 => Ok(Self::Submitted),
            200 => Ok(Self::Approved),
            300 => Ok(Self::Delivered),
            400 => Ok(Self::Errored),
            _ => Err(CoreError::InvalidStateCode { kind: Self::KIND, code }),
        }
    }

    fn is_final(&self) -> bool {
        matches!(self, Self::Delivered | Self::Errored)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Approved)
                | (Self::Approved, Self::Delivered)
                | (Self::Submitted, Self::Errored)
                | (Self::Approved, Self::Errored)
        )
    }

    fn error_state() -> Self {
        Self::Errored
    }
}

impl fmt::Display for IssuanceProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Errored => write!(f, "ERRORED"),
        }
    }
}

/// The issuer's record of one credential request from a holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceProcess {
    #[serde(flatten)]
    pub meta: EntityMeta<IssuanceProcessState>,
    pub participant_context_id: String,
    pub holder_id: String,
    pub holder_pid: String,
    #[serde(default)]
    pub claims: Claims,
    pub credential_definitions: Vec<String>,
    pub credential_formats: BTreeMap<String, CredentialFormat>,
    /// Containers produced by generation, reused by delivery retries.
    #[serde(default)]
    pub credentials: Vec<VerifiableCredentialContainer>,
}

impl IssuanceProcess {
    pub fn new(
        participant_context_id: impl Into<String>,
        holder_id: impl Into<String>,
        holder_pid: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            meta: EntityMeta::new(uuid::Uuid::now_v7().to_string(), IssuanceProcessState::Submitted, now),
            participant_context_id: participant_context_id.into(),
            holder_id: holder_id.into(),
            holder_pid: holder_pid.into(),
            claims: Claims::new(),
            credential_definitions: Vec::new(),
            credential_formats: BTreeMap::new(),
            credentials: Vec::new(),
        }
    }

    pub fn with_definition(mut self, definition_id: impl Into<String>, format: CredentialFormat) -> Self {
        let definition_id = definition_id.into();
        self.credential_formats.insert(definition_id.clone(), format);
        self.credential_definitions.push(definition_id);
        self
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }
}

impl StatefulEntity for IssuanceProcess {
    type State = IssuanceProcessState;

    fn meta(&self) -> &EntityMeta<IssuanceProcessState> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta<IssuanceProcessState> {
        &mut self.meta
    }
}

/// Copies one claim from the evaluated claim set into the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub input: String,
    pub output: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl MappingDefinition {
    pub fn new(input: impl Into<String>, output: impl Into<String>, required: bool) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            required,
        }
    }
}

/// An eligibility rule: a rule type plus its free-form configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub configuration: Value,
}

impl RuleDefinition {
    pub fn new(rule_type: impl Into<String>, configuration: Value) -> Self {
        Self {
            rule_type: rule_type.into(),
            configuration,
        }
    }

    /// An `expression` rule comparing the claim at `claim` against `value`.
    pub fn expression(claim: &str, operator: &str, value: impl Into<Value>) -> Self {
        Self::new(
            "expression",
            json!({"claim": claim, "operator": operator, "value": value.into()}),
        )
    }
}

/// How to evaluate, map and sign one credential type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDefinition {
    pub id: String,
    pub participant_context_id: String,
    pub credential_type: String,
    #[serde(default)]
    pub json_schema: Option<String>,
    /// Validity period of issued credentials, in seconds.
    pub validity: i64,
    #[serde(default)]
    pub data_model: DataModelVersion,
    #[serde(default)]
    pub attestations: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
    #[serde(default)]
    pub mappings: Vec<MappingDefinition>,
    /// Formats this definition may be issued in; empty means any.
    #[serde(default)]
    pub formats: Vec<CredentialFormat>,
}

impl CredentialDefinition {
    pub fn new(
        id: impl Into<String>,
        participant_context_id: impl Into<String>,
        credential_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            participant_context_id: participant_context_id.into(),
            credential_type: credential_type.into(),
            json_schema: None,
            validity: 365 * 24 * 3600,
            data_model: DataModelVersion::V1_1,
            attestations: Vec::new(),
            rules: Vec::new(),
            mappings: Vec::new(),
            formats: Vec::new(),
        }
    }

    pub fn supports_format(&self, format: CredentialFormat) -> bool {
        self.formats.is_empty() || self.formats.contains(&format)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.credential_type.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "credential definition '{}' has an empty credential type",
                self.id
            )));
        }
        if self.validity <= 0 {
            return Err(CoreError::Validation(format!(
                "credential definition '{}' has non-positive validity {}",
                self.id, self.validity
            )));
        }
        Ok(())
    }
}

/// Configures one evidence source used by the attestation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationDefinition {
    pub id: String,
    pub attestation_type: String,
    pub participant_context_id: String,
    #[serde(default)]
    pub configuration: Value,
}

impl AttestationDefinition {
    pub fn new(
        id: impl Into<String>,
        attestation_type: impl Into<String>,
        participant_context_id: impl Into<String>,
        configuration: Value,
    ) -> Self {
        Self {
            id: id.into(),
            attestation_type: attestation_type.into(),
            participant_context_id: participant_context_id.into(),
            configuration,
        }
    }
}

/// The issuer's record of a holder it may issue to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holder {
    pub id: String,
    pub participant_context_id: String,
    pub did: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Base URL of the holder's credential service, used for delivery.
    #[serde(default)]
    pub credential_service_url: Option<String>,
    /// Attributes served to the `holder` attestation source.
    #[serde(default)]
    pub properties: Claims,
}

impl Holder {
    pub fn new(id: impl Into<String>, participant_context_id: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            participant_context_id: participant_context_id.into(),
            did: did.into(),
            name: None,
            credential_service_url: None,
            properties: Claims::new(),
        }
    }
}

/// A tenant of the engine: one issuer or holder identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantContext {
    pub id: String,
    pub did: String,
}

impl ParticipantContext {
    pub fn new(id: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            did: did.into(),
        }
    }
}

/// A signing key registered for a participant. The private half lives in
/// the vault under `private_key_alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairResource {
    pub id: String,
    pub participant_context_id: String,
    pub key_id: String,
    pub private_key_alias: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    pub default_pair: bool,
    pub active: bool,
}
