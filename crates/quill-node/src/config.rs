//! Quill node configuration: participants, engines and the state-machine tuning, loaded from TOML.

use std::collections::BTreeMap;
use std::path::Path;

use quill_core::{AttestationDefinition, CredentialDefinition, Holder, StateMachineConfig};
use serde::{Deserialize, Serialize};

/// Full configuration for a Quill node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuillConfig {
    /// Issuer participant and its engine.
    #[serde(default)]
    pub issuer: IssuerConfig,

    /// Holder participant and its engine.
    #[serde(default)]
    pub holder: HolderConfig,

    /// Records loaded into the in-memory stores at startup.
    #[serde(default)]
    pub seed: SeedConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    #[serde(default = "default_issuer_id")]
    pub participant_context_id: String,
    #[serde(default = "default_issuer_did")]
    pub did: String,
    /// Public base URL under which status lists are published.
    #[serde(default = "default_status_list_base_url")]
    pub status_list_base_url: String,
    #[serde(default = "default_status_list_size")]
    pub status_list_size: usize,
    /// Lifetime of the tokens presented to holders on delivery, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default)]
    pub state_machine: StateMachineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderConfig {
    #[serde(default = "default_holder_id")]
    pub participant_context_id: String,
    #[serde(default = "default_holder_did")]
    pub did: String,
    /// Issuer DID → issuer service base URL.
    #[serde(default)]
    pub issuer_endpoints: BTreeMap<String, String>,
    #[serde(default = "default_poll_interval_secs")]
    pub status_poll_interval_secs: u64,
    /// How long a request may wait in REQUESTED.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    /// Ask for a replacement this long before a credential expires.
    #[serde(default = "default_reissue_grace_secs")]
    pub reissue_grace_secs: u64,
    #[serde(default = "default_status_list_cache_secs")]
    pub status_list_cache_secs: u64,
    #[serde(default = "default_scope_aliases")]
    pub scope_aliases: Vec<String>,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default)]
    pub state_machine: StateMachineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeedConfig {
    #[serde(default)]
    pub credential_definitions: Vec<CredentialDefinition>,
    #[serde(default)]
    pub attestation_definitions: Vec<AttestationDefinition>,
    #[serde(default)]
    pub holders: Vec<Holder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

// serde defaults
fn default_issuer_id() -> String {
    "issuer".into()
}
fn default_issuer_did() -> String {
    "did:web:localhost:issuer".into()
}
fn default_status_list_base_url() -> String {
    "http://localhost:8181/api".into()
}
fn default_status_list_size() -> usize {
    quill_core::status_list::DEFAULT_STATUS_LIST_SIZE
}
fn default_token_ttl_secs() -> u64 {
    300
}
fn default_holder_id() -> String {
    "holder".into()
}
fn default_holder_did() -> String {
    "did:web:localhost:holder".into()
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    3600
}
fn default_watchdog_interval_secs() -> u64 {
    60
}
fn default_reissue_grace_secs() -> u64 {
    7 * 24 * 3600
}
fn default_status_list_cache_secs() -> u64 {
    300
}
fn default_scope_aliases() -> Vec<String> {
    vec![quill_holder::DEFAULT_SCOPE_ALIAS.to_string()]
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            participant_context_id: default_issuer_id(),
            did: default_issuer_did(),
            status_list_base_url: default_status_list_base_url(),
            status_list_size: default_status_list_size(),
            token_ttl_secs: default_token_ttl_secs(),
            state_machine: StateMachineConfig::default(),
        }
    }
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            participant_context_id: default_holder_id(),
            did: default_holder_did(),
            issuer_endpoints: BTreeMap::new(),
            status_poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            reissue_grace_secs: default_reissue_grace_secs(),
            status_list_cache_secs: default_status_list_cache_secs(),
            scope_aliases: default_scope_aliases(),
            token_ttl_secs: default_token_ttl_secs(),
            state_machine: StateMachineConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl QuillConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: QuillConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.issuer.state_machine.validate()?;
        self.holder.state_machine.validate()?;
        if self.issuer.participant_context_id == self.holder.participant_context_id {
            anyhow::bail!("issuer and holder must be different participants");
        }
        if self.holder.status_poll_interval_secs == 0 {
            anyhow::bail!("holder.status_poll_interval_secs must be positive");
        }
        for definition in &self.seed.credential_definitions {
            definition.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QuillConfig::default();
        assert_eq!(config.issuer.participant_context_id, "issuer");
        assert_eq!(config.holder.request_timeout_secs, 3600);
        assert_eq!(config.holder.scope_aliases, vec!["org.eclipse.edc.vc.type".to_string()]);
        assert_eq!(config.logging.format, "text");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = QuillConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let decoded: QuillConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(decoded.issuer.did, config.issuer.did);
        assert_eq!(decoded.holder.state_machine, config.holder.state_machine);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let config = QuillConfig::load(Path::new("/nonexistent/quill.toml")).unwrap();
        assert_eq!(config.holder.participant_context_id, "holder");
    }

    #[test]
    fn test_config_from_toml_partial() {
        let toml_str = r#"
[holder]
did = "did:web:example.com:alice"

[holder.issuer_endpoints]
"did:web:example.com:issuer" = "https://issuer.example.com/api/issuance"

[issuer.state_machine]
retry_limit = 3

[[seed.credential_definitions]]
id = "membership"
participantContextId = "issuer"
credentialType = "MembershipCredential"
validity = 86400
"#;
        let config: QuillConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.holder.did, "did:web:example.com:alice");
        assert_eq!(config.holder.issuer_endpoints.len(), 1);
        assert_eq!(config.issuer.state_machine.retry_limit, 3);
        // Defaults for unspecified
        assert_eq!(config.issuer.state_machine.batch_size, 5);
        assert_eq!(config.seed.credential_definitions[0].credential_type, "MembershipCredential");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_participant_rejected() {
        let mut config = QuillConfig::default();
        config.holder.participant_context_id = "issuer".into();
        assert!(config.validate().is_err());
    }
}
