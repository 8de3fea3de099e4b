use std::fmt;
use std::str::FromStr;

use quill_core::Criterion;

use crate::error::HolderError;

pub const DEFAULT_SCOPE_ALIAS: &str = "org.eclipse.edc.vc.type";

/// Where a stored credential's types live in the credential store's JSON.
pub const CREDENTIAL_TYPES_PATH: &str = "verifiableCredential.credential.types";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOperation {
    Read,
    All,
}

impl FromStr for ScopeOperation {
    type Err = HolderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "*" | "all" => Ok(Self::All),
            other => Err(HolderError::InvalidRequest(format!("unknown scope operation '{other}'"))),
        }
    }
}

/// `<alias>:<credential type>:<operation>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub alias: String,
    pub credential_type: String,
    pub operation: ScopeOperation,
}

impl FromStr for CredentialScope {
    type Err = HolderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [alias, credential_type, operation] = parts.as_slice() else {
            return Err(HolderError::InvalidRequest(format!(
                "scope '{s}' must have the form <alias>:<type>:<operation>"
            )));
        };
        if alias.is_empty() || credential_type.is_empty() {
            return Err(HolderError::InvalidRequest(format!("scope '{s}' has an empty segment")));
        }
        Ok(Self {
            alias: alias.to_string(),
            credential_type: credential_type.to_string(),
            operation: operation.parse()?,
        })
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.operation {
            ScopeOperation::Read => "read",
            ScopeOperation::All => "all",
        };
        write!(f, "{}:{}:{}", self.alias, self.credential_type, op)
    }
}

/// Turns scope strings into credential store criteria.
#[derive(Debug, Clone)]
pub struct ScopeTransformer {
    aliases: Vec<String>,
}

impl Default for ScopeTransformer {
    fn default() -> Self {
        Self {
            aliases: vec![DEFAULT_SCOPE_ALIAS.to_string()],
        }
    }
}

impl ScopeTransformer {
    /// Accept only scopes under `aliases`.
    pub fn new(aliases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            aliases: aliases.into_iter().map(Into::into).collect(),
        }
    }

    pub fn transform(&self, scope: &str) -> Result<Criterion, HolderError> {
        let parsed: CredentialScope = scope.parse()?;
        if !self.aliases.iter().any(|a| *a == parsed.alias) {
            return Err(HolderError::InvalidRequest(format!(
                "scope alias '{}' is not supported",
                parsed.alias
            )));
        }
        Ok(Criterion::contains(CREDENTIAL_TYPES_PATH, parsed.credential_type))
    }
}
