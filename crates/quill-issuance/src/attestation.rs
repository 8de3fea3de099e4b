use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quill_core::claims::{self, Claims};
use quill_core::{AttestationDefinition, CoreError, Holder};
use quill_store::{Repository, StoreError};
use serde_json::Value;

/// Attestation failures. Configuration problems (unknown definition, unknown
/// type, bad configuration) are kept apart from evidence that did not hold up.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation definition '{0}' not found")]
    UnknownDefinition(String),

    #[error("no attestation source registered for type '{0}'")]
    UnknownType(String),

    #[error("attestation '{id}' is misconfigured: {reason}")]
    InvalidConfiguration { id: String, reason: String },

    #[error("attestation '{id}' failed: {reason}")]
    Failed { id: String, reason: String },

    #[error("attestation source unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AttestationError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownDefinition(_) | Self::UnknownType(_) | Self::InvalidConfiguration { .. }
        )
    }
}

impl From<AttestationError> for CoreError {
    fn from(err: AttestationError) -> Self {
        match err {
            AttestationError::Store(e) => e.into(),
            AttestationError::Failed { .. } => CoreError::Unauthorized(err.to_string()),
            AttestationError::Unavailable(_) => CoreError::Transient(err.to_string()),
            _ => CoreError::Configuration(err.to_string()),
        }
    }
}

/// What an attestation source sees: who is asking, about whom, and the
/// claims gathered so far.
#[derive(Debug, Clone)]
pub struct AttestationContext {
    pub participant_context_id: String,
    pub holder: Holder,
    pub claims: Claims,
}

impl AttestationContext {
    pub fn new(participant_context_id: impl Into<String>, holder: Holder) -> Self {
        Self {
            participant_context_id: participant_context_id.into(),
            holder,
            claims: Claims::new(),
        }
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }
}

/// A configured source of evidence.
#[async_trait]
pub trait AttestationSource: Send + Sync {
    async fn execute(&self, ctx: &AttestationContext) -> Result<Claims, AttestationError>;
}

/// Builds sources of one attestation type from their definitions.
pub trait AttestationSourceFactory: Send + Sync {
    fn create(&self, definition: &AttestationDefinition) -> Result<Box<dyn AttestationSource>, AttestationError>;
}

/// Resolves attestation definitions and runs their sources in order.
pub struct AttestationPipeline {
    definitions: Arc<dyn Repository<AttestationDefinition>>,
    factories: HashMap<String, Arc<dyn AttestationSourceFactory>>,
}

impl AttestationPipeline {
    /// A pipeline with no source types registered.
    pub fn new(definitions: Arc<dyn Repository<AttestationDefinition>>) -> Self {
        Self {
            definitions,
            factories: HashMap::new(),
        }
    }

    /// A pipeline with the `static` and `holder` source types registered.
    pub fn with_builtin_sources(definitions: Arc<dyn Repository<AttestationDefinition>>) -> Self {
        let mut pipeline = Self::new(definitions);
        pipeline.register_factory(StaticAttestationFactory::TYPE, Arc::new(StaticAttestationFactory));
        pipeline.register_factory(HolderAttestationFactory::TYPE, Arc::new(HolderAttestationFactory));
        pipeline
    }

    pub fn register_factory(&mut self, attestation_type: impl Into<String>, factory: Arc<dyn AttestationSourceFactory>) {
        let attestation_type = attestation_type.into();
        tracing::debug!(attestation_type = %attestation_type, "registering attestation source");
        self.factories.insert(attestation_type, factory);
    }

    /// Run every listed attestation and merge their claims. Later sources
    /// overwrite earlier ones key by key; the first failure aborts.
    pub async fn evaluate(&self, attestation_ids: &[String], ctx: &AttestationContext) -> Result<Claims, AttestationError> {
        let mut ctx = ctx.clone();
        let mut collected = Claims::new();

        for id in attestation_ids {
            let definition = self
                .definitions
                .find_by_id(id)?
                .ok_or_else(|| AttestationError::UnknownDefinition(id.clone()))?;
            let factory = self
                .factories
                .get(&definition.attestation_type)
                .ok_or_else(|| AttestationError::UnknownType(definition.attestation_type.clone()))?;

            let source = factory.create(&definition)?;
            let claims = source.execute(&ctx).await?;
            tracing::debug!(
                attestation = %id,
                attestation_type = %definition.attestation_type,
                claims = claims.len(),
                "attestation evaluated"
            );
            claims::merge(&mut collected, claims.clone());
            claims::merge(&mut ctx.claims, claims);
        }

        Ok(collected)
    }
}

/// Fixed claims taken from the definition: `{"claims": {...}}`.
pub struct StaticAttestationFactory;

impl StaticAttestationFactory {
    pub const TYPE: &'static str = "static";
}

struct StaticAttestationSource {
    claims: Claims,
}

impl AttestationSourceFactory for StaticAttestationFactory {
    fn create(&self, definition: &AttestationDefinition) -> Result<Box<dyn AttestationSource>, AttestationError> {
        match definition.configuration.get("claims") {
            Some(Value::Object(claims)) => Ok(Box::new(StaticAttestationSource { claims: claims.clone() })),
            _ => Err(AttestationError::InvalidConfiguration {
                id: definition.id.clone(),
                reason: "'claims' must be an object".into(),
            }),
        }
    }
}

#[async_trait]
impl AttestationSource for StaticAttestationSource {
    async fn execute(&self, _ctx: &AttestationContext) -> Result<Claims, AttestationError> {
        Ok(self.claims.clone())
    }
}

/// Claims from the issuer's own record of the holder.
///
/// The holder's properties are returned as-is; `{"required": [..]}` names
/// properties that must be present for the attestation to hold.
pub struct HolderAttestationFactory;

impl HolderAttestationFactory {
    pub const TYPE: &'static str = "holder";
}

struct HolderAttestationSource {
    id: String,
    required: Vec<String>,
}

impl AttestationSourceFactory for HolderAttestationFactory {
    fn create(&self, definition: &AttestationDefinition) -> Result<Box<dyn AttestationSource>, AttestationError> {
        let required = match definition.configuration.get("required") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(String::from).ok_or_else(|| AttestationError::InvalidConfiguration {
                        id: definition.id.clone(),
                        reason: format!("required property {item} is not a string"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(AttestationError::InvalidConfiguration {
                    id: definition.id.clone(),
                    reason: "'required' must be an array".into(),
                })
            }
        };
        Ok(Box::new(HolderAttestationSource {
            id: definition.id.clone(),
            required,
        }))
    }
}

#[async_trait]
impl AttestationSource for HolderAttestationSource {
    async fn execute(&self, ctx: &AttestationContext) -> Result<Claims, AttestationError> {
        let properties = &ctx.holder.properties;
        if let Some(missing) = self.required.iter().find(|p| claims::navigate(properties, p).is_none()) {
            return Err(AttestationError::Failed {
                id: self.id.clone(),
                reason: format!("holder '{}' has no '{missing}' property", ctx.holder.id),
            });
        }
        Ok(properties.clone())
    }
}
