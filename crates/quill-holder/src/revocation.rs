use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quill_core::config::to_chrono;
use quill_core::credential::BITSTRING_STATUS_LIST_ENTRY;
use quill_core::{Clock, CoreError, StatusList, StatusListResolver, StatusPurpose, VerifiableCredential};
use serde_json::Value;

use crate::error::HolderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    Valid,
    Suspended,
    Revoked,
}

/// Live status check of a credential against its issuer's status lists.
#[async_trait]
pub trait RevocationService: Send + Sync {
    async fn check(&self, credential: &VerifiableCredential) -> Result<RevocationStatus, HolderError>;
}

/// Checks `BitstringStatusListEntry` entries. A set revocation bit wins over
/// a set suspension bit; credentials without entries are always valid.
pub struct StatusListRevocationService {
    resolver: Arc<dyn StatusListResolver>,
}

impl StatusListRevocationService {
    pub fn new(resolver: Arc<dyn StatusListResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl RevocationService for StatusListRevocationService {
    async fn check(&self, credential: &VerifiableCredential) -> Result<RevocationStatus, HolderError> {
        let mut status = RevocationStatus::Valid;
        for entry in &credential.credential_status {
            if entry.status_type != BITSTRING_STATUS_LIST_ENTRY {
                tracing::debug!(credential_id = %credential.id, status_type = %entry.status_type, "unsupported status entry skipped");
                continue;
            }
            let list = self.resolver.resolve(&entry.status_list_credential).await?;
            if list.purpose != entry.status_purpose {
                return Err(HolderError::InvalidCredential(format!(
                    "entry '{}' expects a {} list, '{}' is a {} list",
                    entry.id, entry.status_purpose, list.url, list.purpose
                )));
            }
            let index = usize::try_from(entry.status_list_index)
                .map_err(|_| HolderError::InvalidCredential(format!("index {} out of range", entry.status_list_index)))?;
            if !list.bits.get(index)? {
                continue;
            }
            match entry.status_purpose {
                StatusPurpose::Revocation => return Ok(RevocationStatus::Revoked),
                StatusPurpose::Suspension => status = RevocationStatus::Suspended,
            }
        }
        Ok(status)
    }
}

/// Fetches published status list credentials over HTTP. Accepts the plain
/// JSON form and the JWT-secured form (list in the `vc` claim).
pub struct HttpStatusListResolver {
    http: reqwest::Client,
}

impl HttpStatusListResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn parse_list_credential(url: &str, body: &str) -> Result<StatusList, CoreError> {
    let body = body.trim();
    let document = if body.starts_with('{') {
        serde_json::from_str::<Value>(body)?
    } else {
        let (_, claims) = quill_crypto::decode_unverified(body).map_err(CoreError::from)?;
        claims
            .get("vc")
            .cloned()
            .ok_or_else(|| CoreError::Validation(format!("status list token from '{url}' has no vc claim")))?
    };
    StatusList::from_credential_json(url, &document)
}

#[async_trait]
impl StatusListResolver for HttpStatusListResolver {
    async fn resolve(&self, url: &str) -> Result<StatusList, CoreError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::Transient(format!("GET {url}: {e}")))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(format!("status list '{url}'")));
        }
        if !status.is_success() {
            return Err(CoreError::Transient(format!("GET {url} returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::Transient(format!("GET {url}: {e}")))?;
        parse_list_credential(url, &body)
    }
}

/// Keeps resolved lists for `ttl` to spare the issuer a fetch per credential.
pub struct CachingStatusListResolver {
    inner: Arc<dyn StatusListResolver>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, (DateTime<Utc>, StatusList)>,
}

impl CachingStatusListResolver {
    pub fn new(inner: Arc<dyn StatusListResolver>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            ttl,
            clock,
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl StatusListResolver for CachingStatusListResolver {
    async fn resolve(&self, url: &str) -> Result<StatusList, CoreError> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(url) {
            let (fetched_at, list) = entry.value();
            if now - *fetched_at < to_chrono(self.ttl) {
                return Ok(list.clone());
            }
        }
        let list = self.inner.resolve(url).await?;
        self.entries.insert(url.to_string(), (now, list.clone()));
        Ok(list)
    }
}
