use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::config::to_chrono;
use quill_core::credential::VC_TYPE;
use quill_core::dcp::{CredentialEnvelope, CredentialMessage, DcpRequestStatus};
use quill_core::{Clock, Holder, IssuanceProcess, ParticipantContext, VerifiableCredentialContainer};
use quill_crypto::ParticipantKeys;
use quill_store::Repository;

use crate::error::IssuanceError;

/// Delivers issued credentials to the holder's credential service.
#[async_trait]
pub trait CredentialStorageClient: Send + Sync {
    async fn deliver_credentials(
        &self,
        process: &IssuanceProcess,
        credentials: &[VerifiableCredentialContainer],
    ) -> Result<(), IssuanceError>;
}

/// The DCP credential message for a finished process.
pub fn credential_message(process: &IssuanceProcess, credentials: &[VerifiableCredentialContainer]) -> CredentialMessage {
    CredentialMessage {
        issuer_pid: process.meta.id.clone(),
        holder_pid: process.holder_pid.clone(),
        status: DcpRequestStatus::Issued,
        credentials: credentials
            .iter()
            .map(|c| CredentialEnvelope {
                credential_type: c.credential.primary_type().unwrap_or(VC_TYPE).to_string(),
                format: c.format,
                payload: c.raw_vc.clone(),
            })
            .collect(),
    }
}

/// POSTs the credential message to `{credentialServiceUrl}/credentials`,
/// authenticated with a self-issued token for the holder.
pub struct HttpCredentialStorageClient {
    http: reqwest::Client,
    participants: Arc<dyn Repository<ParticipantContext>>,
    holders: Arc<dyn Repository<Holder>>,
    keys: ParticipantKeys,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
}

impl HttpCredentialStorageClient {
    pub fn new(
        http: reqwest::Client,
        participants: Arc<dyn Repository<ParticipantContext>>,
        holders: Arc<dyn Repository<Holder>>,
        keys: ParticipantKeys,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            participants,
            holders,
            keys,
            clock,
            token_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }
}

#[async_trait]
impl CredentialStorageClient for HttpCredentialStorageClient {
    async fn deliver_credentials(
        &self,
        process: &IssuanceProcess,
        credentials: &[VerifiableCredentialContainer],
    ) -> Result<(), IssuanceError> {
        let participant = &process.participant_context_id;
        let issuer_did = self
            .participants
            .find_by_id(participant)?
            .map(|p| p.did)
            .ok_or_else(|| IssuanceError::not_found("participant context", participant))?;
        let holder = self
            .holders
            .find_by_id(&process.holder_id)?
            .ok_or_else(|| IssuanceError::not_found("holder", &process.holder_id))?;
        let base = holder
            .credential_service_url
            .as_deref()
            .ok_or_else(|| IssuanceError::not_found("credential service url of holder", &holder.id))?;

        let token = self
            .keys
            .self_issued_token(participant, &issuer_did, &holder.did, self.clock.now(), to_chrono(self.token_ttl))
            .await?;
        let url = format!("{}/credentials", base.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&credential_message(process, credentials))
            .send()
            .await
            .map_err(|e| IssuanceError::Delivery(format!("POST {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IssuanceError::Delivery(format!("POST {url} returned {status}")));
        }
        tracing::info!(
            process_id = %process.meta.id,
            holder = %holder.did,
            credentials = credentials.len(),
            "credentials delivered"
        );
        Ok(())
    }
}
