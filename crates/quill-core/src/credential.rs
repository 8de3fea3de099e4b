use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::claims::Claims;
use crate::error::CoreError;

pub const VC_TYPE: &str = "VerifiableCredential";
pub const W3C_V1_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
pub const W3C_V2_CONTEXT: &str = "https://www.w3.org/ns/credentials/v2";
pub const BITSTRING_STATUS_LIST_ENTRY: &str = "BitstringStatusListEntry";

/// Securing format of an issued credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CredentialFormat {
    #[serde(rename = "VC1_0_JWT")]
    Vc1Jwt,
    #[serde(rename = "VC1_0_LD")]
    Vc1Ld,
    #[serde(rename = "VC2_0_JOSE")]
    Vc2Jose,
    #[serde(rename = "VC2_0_SD_JWT")]
    Vc2SdJwt,
}

impl CredentialFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vc1Jwt => "VC1_0_JWT",
            Self::Vc1Ld => "VC1_0_LD",
            Self::Vc2Jose => "VC2_0_JOSE",
            Self::Vc2SdJwt => "VC2_0_SD_JWT",
        }
    }
}

impl fmt::Display for CredentialFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VC1_0_JWT" | "JWT" => Ok(Self::Vc1Jwt),
            "VC1_0_LD" | "LD" | "JSON_LD" | "LDP" => Ok(Self::Vc1Ld),
            "VC2_0_JOSE" | "JOSE" => Ok(Self::Vc2Jose),
            "VC2_0_SD_JWT" | "SD_JWT" => Ok(Self::Vc2SdJwt),
            _ => Err(CoreError::Validation(format!("unknown credential format '{s}'"))),
        }
    }
}

/// W3C VC data model version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataModelVersion {
    #[default]
    #[serde(rename = "V_1_1")]
    V1_1,
    #[serde(rename = "V_2_0")]
    V2_0,
}

impl DataModelVersion {
    pub fn context(&self) -> &'static str {
        match self {
            Self::V1_1 => W3C_V1_CONTEXT,
            Self::V2_0 => W3C_V2_CONTEXT,
        }
    }
}

/// Lifecycle state of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VcStatus {
    Initial,
    Issued,
    NotYetValid,
    Suspended,
    Revoked,
    Expired,
    Error,
}

impl VcStatus {
    pub fn code(&self) -> i32 {
        match self {
            Self::Initial => 100,
            Self::Issued => 200,
            Self::NotYetValid => 300,
            Self::Suspended => 400,
            Self::Revoked => 500,
            Self::Expired => 600,
            Self::Error => -100,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, CoreError> {
        match code {
            100 => Ok(Self::Initial),
            200 => Ok(Self::Issued),
            300 => Ok(Self::NotYetValid),
            400 => Ok(Self::Suspended),
            500 => Ok(Self::Revoked),
            600 => Ok(Self::Expired),
            -100 => Ok(Self::Error),
            _ => Err(CoreError::InvalidStateCode {
                kind: "credential",
                code,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Issued => "ISSUED",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::Suspended => "SUSPENDED",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for VcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPurpose {
    Revocation,
    Suspension,
}

impl StatusPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revocation => "revocation",
            Self::Suspension => "suspension",
        }
    }
}

impl fmt::Display for StatusPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusPurpose {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "revocation" => Ok(Self::Revocation),
            "suspension" => Ok(Self::Suspension),
            other => Err(CoreError::Validation(format!("unsupported status purpose '{other}'"))),
        }
    }
}

/// A `credentialStatus` entry pointing into a bitstring status list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub status_type: String,
    pub status_purpose: StatusPurpose,
    pub status_list_index: u64,
    pub status_list_credential: String,
}

impl CredentialStatus {
    pub fn bitstring(status_list_credential: impl Into<String>, purpose: StatusPurpose, index: u64) -> Self {
        let list = status_list_credential.into();
        Self {
            id: format!("{list}#{index}"),
            status_type: BITSTRING_STATUS_LIST_ENTRY.into(),
            status_purpose: purpose,
            status_list_index: index,
            status_list_credential: list,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.status_type,
            "statusPurpose": self.status_purpose.as_str(),
            "statusListIndex": self.status_list_index.to_string(),
            "statusListCredential": self.status_list_credential,
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        let field = |name: &str| {
            value
                .get(name)
                .ok_or_else(|| CoreError::Validation(format!("credentialStatus is missing '{name}'")))
        };
        let index = match field("statusListIndex")? {
            Value::String(s) => s
                .parse::<u64>()
                .map_err(|_| CoreError::Validation(format!("invalid statusListIndex '{s}'")))?,
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| CoreError::Validation(format!("invalid statusListIndex {n}")))?,
            other => return Err(CoreError::Validation(format!("invalid statusListIndex {other}"))),
        };
        Ok(Self {
            id: string_field(field("id")?, "id")?,
            status_type: string_field(field("type")?, "type")?,
            status_purpose: string_field(field("statusPurpose")?, "statusPurpose")?.parse()?,
            status_list_index: index,
            status_list_credential: string_field(field("statusListCredential")?, "statusListCredential")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSubject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub claims: Claims,
}

impl CredentialSubject {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert("id".into(), Value::String(id.clone()));
        }
        for (k, v) in &self.claims {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        let mut claims = value
            .as_object()
            .cloned()
            .ok_or_else(|| CoreError::Validation("credentialSubject must be an object".into()))?;
        let id = match claims.remove("id") {
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                return Err(CoreError::Validation(format!("credentialSubject id must be a string, got {other}")))
            }
            None => None,
        };
        Ok(Self { id, claims })
    }
}

/// The decoded content of a credential, independent of its securing format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    pub id: String,
    pub types: Vec<String>,
    pub issuer: String,
    pub issuance_date: DateTime<Utc>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    pub credential_subject: Vec<CredentialSubject>,
    #[serde(default)]
    pub credential_status: Vec<CredentialStatus>,
    #[serde(default)]
    pub data_model: DataModelVersion,
}

impl VerifiableCredential {
    /// A credential of `credential_type` with a fresh `urn:uuid` id.
    pub fn new(credential_type: &str, issuer: impl Into<String>, issuance_date: DateTime<Utc>) -> Self {
        let mut types = vec![VC_TYPE.to_string()];
        if credential_type != VC_TYPE {
            types.push(credential_type.to_string());
        }
        Self {
            id: format!("urn:uuid:{}", uuid::Uuid::now_v7()),
            types,
            issuer: issuer.into(),
            issuance_date,
            expiration_date: None,
            credential_subject: Vec::new(),
            credential_status: Vec::new(),
            data_model: DataModelVersion::V1_1,
        }
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration);
        self
    }

    pub fn with_subject(mut self, subject: CredentialSubject) -> Self {
        self.credential_subject.push(subject);
        self
    }

    pub fn with_status(mut self, status: CredentialStatus) -> Self {
        self.credential_status.push(status);
        self
    }

    pub fn has_type(&self, credential_type: &str) -> bool {
        self.types.iter().any(|t| t == credential_type)
    }

    /// The first type other than the generic `VerifiableCredential`.
    pub fn primary_type(&self) -> Option<&str> {
        self.types.iter().map(String::as_str).find(|t| *t != VC_TYPE)
    }

    /// Id of the first credential subject.
    pub fn subject_id(&self) -> Option<&str> {
        self.credential_subject.iter().find_map(|s| s.id.as_deref())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.is_some_and(|exp| exp < now)
    }

    pub fn is_not_yet_valid(&self, now: DateTime<Utc>) -> bool {
        self.issuance_date > now
    }

    /// Render the credential in W3C JSON layout.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("@context".into(), json!([self.data_model.context()]));
        map.insert("id".into(), json!(self.id));
        map.insert("type".into(), json!(self.types));
        map.insert("issuer".into(), json!(self.issuer));
        let (from_key, until_key) = match self.data_model {
            DataModelVersion::V1_1 => ("issuanceDate", "expirationDate"),
            DataModelVersion::V2_0 => ("validFrom", "validUntil"),
        };
        map.insert(from_key.into(), json!(self.issuance_date.to_rfc3339()));
        if let Some(exp) = self.expiration_date {
            map.insert(until_key.into(), json!(exp.to_rfc3339()));
        }
        let subjects: Vec<Value> = self.credential_subject.iter().map(CredentialSubject::to_json).collect();
        map.insert("credentialSubject".into(), collapse(subjects));
        if !self.credential_status.is_empty() {
            let statuses: Vec<Value> = self.credential_status.iter().map(CredentialStatus::to_json).collect();
            map.insert("credentialStatus".into(), collapse(statuses));
        }
        Value::Object(map)
    }

    /// Parse a W3C JSON credential.
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::Validation("credential must be a JSON object".into()))?;

        let data_model = match obj.get("@context") {
            Some(ctx) if ctx.to_string().contains(W3C_V2_CONTEXT) => DataModelVersion::V2_0,
            _ => DataModelVersion::V1_1,
        };
        let types = match obj.get("type") {
            Some(Value::String(t)) => vec![t.clone()],
            Some(Value::Array(items)) => items.iter().filter_map(|t| t.as_str().map(String::from)).collect(),
            _ => return Err(CoreError::Validation("credential has no type".into())),
        };
        let issuer = match obj.get("issuer") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(o)) => o
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| CoreError::Validation("issuer object has no id".into()))?,
            _ => return Err(CoreError::Validation("credential has no issuer".into())),
        };
        let issuance_date = obj
            .get("issuanceDate")
            .or_else(|| obj.get("validFrom"))
            .ok_or_else(|| CoreError::Validation("credential has no issuance date".into()))
            .and_then(parse_date)?;
        let expiration_date = obj
            .get("expirationDate")
            .or_else(|| obj.get("validUntil"))
            .map(parse_date)
            .transpose()?;
        let credential_subject = expand(obj.get("credentialSubject"))
            .iter()
            .map(CredentialSubject::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let credential_status = expand(obj.get("credentialStatus"))
            .iter()
            .map(CredentialStatus::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: obj.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            types,
            issuer,
            issuance_date,
            expiration_date,
            credential_subject,
            credential_status,
            data_model,
        })
    }
}

fn collapse(mut items: Vec<Value>) -> Value {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Value::Array(items)
    }
}

fn expand(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

fn string_field(value: &Value, name: &str) -> Result<String, CoreError> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| CoreError::Validation(format!("'{name}' must be a string")))
}

fn parse_date(value: &Value) -> Result<DateTime<Utc>, CoreError> {
    let text = value
        .as_str()
        .ok_or_else(|| CoreError::Validation(format!("date must be a string, got {value}")))?;
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CoreError::Validation(format!("invalid date '{text}': {e}")))
}

/// A secured credential: its raw serialized form plus the decoded content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredentialContainer {
    pub raw_vc: String,
    pub format: CredentialFormat,
    pub credential: VerifiableCredential,
}

impl VerifiableCredentialContainer {
    pub fn new(raw_vc: impl Into<String>, format: CredentialFormat, credential: VerifiableCredential) -> Self {
        Self {
            raw_vc: raw_vc.into(),
            format,
            credential,
        }
    }
}

/// A credential held in a participant's store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredentialResource {
    pub id: String,
    pub participant_context_id: String,
    pub issuer_id: String,
    pub holder_id: String,
    pub state: VcStatus,
    pub verifiable_credential: VerifiableCredentialContainer,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub reissue_request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl VerifiableCredentialResource {
    pub fn new(
        participant_context_id: impl Into<String>,
        container: VerifiableCredentialContainer,
        state: VcStatus,
        now: DateTime<Utc>,
    ) -> Self {
        let issuer_id = container.credential.issuer.clone();
        let holder_id = container.credential.subject_id().unwrap_or_default().to_string();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            participant_context_id: participant_context_id.into(),
            issuer_id,
            holder_id,
            state,
            verifiable_credential: container,
            metadata: HashMap::new(),
            reissue_request_id: None,
            timestamp: now,
        }
    }

    pub fn credential(&self) -> &VerifiableCredential {
        &self.verifiable_credential.credential
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
