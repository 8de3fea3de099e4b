use std::collections::HashSet;
use std::sync::Arc;

use quill_core::{
    Clock, Criterion, QuerySpec, VcStatus, VerifiableCredentialContainer, VerifiableCredentialResource,
};
use quill_store::Repository;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::revocation::{RevocationService, RevocationStatus};
use crate::scope::ScopeTransformer;

/// A verifier's request for credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationQuery {
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub presentation_definition: Option<Value>,
}

impl PresentationQuery {
    pub fn scoped(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            presentation_definition: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Success(Vec<VerifiableCredentialContainer>),
    NoScopeFound(String),
    InvalidScope(Vec<String>),
    Unauthorized(String),
    StorageFailure(String),
    Unsupported(String),
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn credentials(&self) -> &[VerifiableCredentialContainer] {
        match self {
            Self::Success(credentials) => credentials,
            _ => &[],
        }
    }
}

/// Answers presentation queries from the holder's credential store, limited
/// to what the access token's scopes grant.
pub struct CredentialQueryResolver {
    credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
    transformer: ScopeTransformer,
    revocation: Arc<dyn RevocationService>,
    clock: Arc<dyn Clock>,
}

impl CredentialQueryResolver {
    pub fn new(
        credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
        transformer: ScopeTransformer,
        revocation: Arc<dyn RevocationService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            transformer,
            revocation,
            clock,
        }
    }

    fn criteria(&self, scopes: &[String]) -> Result<Vec<Criterion>, Vec<String>> {
        let mut criteria = Vec::with_capacity(scopes.len());
        let mut errors = Vec::new();
        for scope in scopes {
            match self.transformer.transform(scope) {
                Ok(c) => criteria.push(c),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if errors.is_empty() {
            Ok(criteria)
        } else {
            Err(errors)
        }
    }

    /// Union over the criteria, each ANDed with the participant and
    /// liveness filters.
    fn find(
        &self,
        participant_context_id: &str,
        criteria: &[Criterion],
    ) -> Result<Vec<VerifiableCredentialResource>, String> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for criterion in criteria {
            let spec = QuerySpec::new(vec![
                criterion.clone(),
                Criterion::eq("participantContextId", participant_context_id),
                Criterion::neq("state", VcStatus::Revoked.as_str()),
                Criterion::neq("state", VcStatus::Expired.as_str()),
            ]);
            for resource in self.credentials.query(&spec).map_err(|e| e.to_string())? {
                if seen.insert(resource.id.clone()) {
                    found.push(resource);
                }
            }
        }
        Ok(found)
    }

    async fn is_presentable(&self, resource: &VerifiableCredentialResource) -> bool {
        let now = self.clock.now();
        let credential = resource.credential();
        if credential.is_not_yet_valid(now) {
            tracing::debug!(credential_id = %resource.id, "credential not yet valid");
            return false;
        }
        if credential.is_expired(now) {
            tracing::debug!(credential_id = %resource.id, "credential expired");
            return false;
        }
        if credential.credential_status.is_empty() {
            return true;
        }
        match self.revocation.check(credential).await {
            Ok(RevocationStatus::Valid) => true,
            Ok(status) => {
                tracing::debug!(credential_id = %resource.id, ?status, "credential withheld");
                false
            }
            Err(e) => {
                tracing::warn!(credential_id = %resource.id, error = %e, "revocation check failed");
                false
            }
        }
    }

    pub async fn query(
        &self,
        participant_context_id: &str,
        query: &PresentationQuery,
        issuer_scopes: &[String],
    ) -> QueryResult {
        if query.presentation_definition.is_some() {
            return QueryResult::Unsupported("Presentation Definition queries are not supported.".into());
        }
        if query.scopes.is_empty() {
            return QueryResult::NoScopeFound("Invalid query: must contain at least one scope.".into());
        }
        let requested_criteria = match self.criteria(&query.scopes) {
            Ok(c) => c,
            Err(errors) => return QueryResult::InvalidScope(errors),
        };
        let granted_criteria = match self.criteria(issuer_scopes) {
            Ok(c) => c,
            Err(errors) => return QueryResult::InvalidScope(errors),
        };

        let requested = match self.find(participant_context_id, &requested_criteria) {
            Ok(r) => r,
            Err(e) => return QueryResult::StorageFailure(e),
        };
        let granted: HashSet<String> = match self.find(participant_context_id, &granted_criteria) {
            Ok(g) => g.into_iter().map(|r| r.id).collect(),
            Err(e) => return QueryResult::StorageFailure(e),
        };
        if !requested.iter().all(|r| granted.contains(&r.id)) {
            tracing::info!(
                participant = %participant_context_id,
                requested = requested.len(),
                granted = granted.len(),
                "query exceeds granted scopes"
            );
            return QueryResult::Unauthorized("Invalid query: requested Credentials outside of scope.".into());
        }

        let mut presentable = Vec::with_capacity(requested.len());
        for resource in requested {
            if self.is_presentable(&resource).await {
                presentable.push(resource.verifiable_credential);
            }
        }
        tracing::debug!(participant = %participant_context_id, credentials = presentable.len(), "query resolved");
        QueryResult::Success(presentable)
    }
}
