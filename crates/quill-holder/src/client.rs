use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::config::to_chrono;
use quill_core::dcp::{
    CredentialRequestMessage, CredentialRequestResponse, CredentialRequestSpecifier, CredentialRequestStatus,
};
use quill_core::{Clock, HolderCredentialRequest, ParticipantContext};
use quill_crypto::ParticipantKeys;
use quill_store::Repository;
use reqwest::StatusCode;

use crate::error::HolderError;

/// The issuer's side of the DCP credential request protocol.
#[async_trait]
pub trait IssuerClient: Send + Sync {
    /// Send the request; the issuer answers with its own process id.
    async fn request_credentials(
        &self,
        request: &HolderCredentialRequest,
    ) -> Result<CredentialRequestResponse, HolderError>;

    async fn request_status(
        &self,
        request: &HolderCredentialRequest,
        issuer_pid: &str,
    ) -> Result<CredentialRequestStatus, HolderError>;
}

/// Maps an issuer DID to the base URL of its issuer service.
#[async_trait]
pub trait IssuerEndpointResolver: Send + Sync {
    async fn resolve(&self, issuer_did: &str) -> Result<String, HolderError>;
}

/// Fixed DID → endpoint table, filled from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticEndpointResolver {
    endpoints: HashMap<String, String>,
}

impl StaticEndpointResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, issuer_did: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.endpoints.insert(issuer_did.into(), base_url.into());
        self
    }
}

#[async_trait]
impl IssuerEndpointResolver for StaticEndpointResolver {
    async fn resolve(&self, issuer_did: &str) -> Result<String, HolderError> {
        self.endpoints
            .get(issuer_did)
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| HolderError::not_found("issuer endpoint", issuer_did))
    }
}

/// The DCP request body for a holder request.
pub fn request_message(request: &HolderCredentialRequest) -> CredentialRequestMessage {
    CredentialRequestMessage {
        holder_pid: request.holder_pid().to_string(),
        credentials: request
            .types_and_formats
            .iter()
            .map(|(credential_type, format)| CredentialRequestSpecifier {
                credential_type: credential_type.clone(),
                format: *format,
            })
            .collect(),
    }
}

/// Talks DCP over HTTP, authenticated with a self-issued token audienced
/// to the issuer.
pub struct HttpIssuerClient {
    http: reqwest::Client,
    endpoints: Arc<dyn IssuerEndpointResolver>,
    participants: Arc<dyn Repository<ParticipantContext>>,
    keys: ParticipantKeys,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
}

impl HttpIssuerClient {
    pub fn new(
        http: reqwest::Client,
        endpoints: Arc<dyn IssuerEndpointResolver>,
        participants: Arc<dyn Repository<ParticipantContext>>,
        keys: ParticipantKeys,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            endpoints,
            participants,
            keys,
            clock,
            token_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    async fn token(&self, request: &HolderCredentialRequest) -> Result<String, HolderError> {
        let participant = &request.participant_context_id;
        let own_did = self
            .participants
            .find_by_id(participant)?
            .map(|p| p.did)
            .ok_or_else(|| HolderError::not_found("participant context", participant))?;
        Ok(self
            .keys
            .self_issued_token(participant, &own_did, &request.issuer_did, self.clock.now(), to_chrono(self.token_ttl))
            .await?)
    }
}

/// 4xx answers are final, except the ones that invite a retry.
fn classify(what: &str, status: StatusCode) -> HolderError {
    let retryable = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT;
    if retryable {
        HolderError::Issuer(format!("{what} returned {status}"))
    } else {
        HolderError::IssuerRejected(format!("{what} returned {status}"))
    }
}

#[async_trait]
impl IssuerClient for HttpIssuerClient {
    async fn request_credentials(
        &self,
        request: &HolderCredentialRequest,
    ) -> Result<CredentialRequestResponse, HolderError> {
        let base = self.endpoints.resolve(&request.issuer_did).await?;
        let url = format!("{base}/credentials");
        let what = format!("POST {url}");
        let token = self.token(request).await?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request_message(request))
            .send()
            .await
            .map_err(|e| HolderError::Issuer(format!("{what}: {e}")))?;
        if !response.status().is_success() {
            return Err(classify(&what, response.status()));
        }
        let body: CredentialRequestResponse = response
            .json()
            .await
            .map_err(|e| HolderError::IssuerRejected(format!("{what}: unreadable response: {e}")))?;

        tracing::info!(
            holder_pid = %request.holder_pid(),
            issuer = %request.issuer_did,
            issuer_pid = %body.issuer_pid,
            "credential request sent"
        );
        Ok(body)
    }

    async fn request_status(
        &self,
        request: &HolderCredentialRequest,
        issuer_pid: &str,
    ) -> Result<CredentialRequestStatus, HolderError> {
        let base = self.endpoints.resolve(&request.issuer_did).await?;
        let url = format!("{base}/requests/{issuer_pid}");
        let what = format!("GET {url}");
        let token = self.token(request).await?;

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| HolderError::Issuer(format!("{what}: {e}")))?;
        if !response.status().is_success() {
            return Err(classify(&what, response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| HolderError::IssuerRejected(format!("{what}: unreadable response: {e}")))
    }
}
