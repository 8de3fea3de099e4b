use std::sync::Arc;
use std::time::Duration;

use quill_core::dcp::{CredentialMessage, DcpRequestStatus};
use quill_core::{
    in_transaction, Clock, CoreError, Criterion, EngineEvent, EventBus, HolderCredentialRequest, HolderRequestState,
    QuerySpec, StatefulEntity, TransactionContext, VcStatus, VerifiableCredentialContainer,
    VerifiableCredentialResource,
};
use quill_statemachine::LeasedUpdate;
use quill_store::{Repository, StateEntityStore};

use crate::error::HolderError;
use crate::verification::{CredentialVerifier, IssuerKeyResolver};

pub const RECEIVER_LEASER_ID: &str = "credential-receiver";

/// Stores credentials an issuer delivers and completes the matching request.
pub struct CredentialReceiver {
    requests: Arc<dyn StateEntityStore<HolderCredentialRequest>>,
    credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
    verifier: CredentialVerifier,
    update: LeasedUpdate<HolderCredentialRequest>,
    tx: Arc<dyn TransactionContext>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl CredentialReceiver {
    pub fn new(
        requests: Arc<dyn StateEntityStore<HolderCredentialRequest>>,
        credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
        issuer_keys: Arc<dyn IssuerKeyResolver>,
        tx: Arc<dyn TransactionContext>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            update: LeasedUpdate::new(requests.clone(), RECEIVER_LEASER_ID, lease_duration),
            requests,
            credentials,
            verifier: CredentialVerifier::new(issuer_keys),
            tx,
            events,
            clock,
        }
    }

    fn request(&self, participant_context_id: &str, message: &CredentialMessage) -> Result<HolderCredentialRequest, HolderError> {
        let request = self
            .requests
            .find_by_id(&message.holder_pid)?
            .filter(|r| r.participant_context_id == participant_context_id)
            .ok_or_else(|| HolderError::not_found("holder credential request", &message.holder_pid))?;
        if request.state() == HolderRequestState::Error {
            return Err(HolderError::InvalidRequest(format!(
                "request '{}' has already failed",
                message.holder_pid
            )));
        }
        if request
            .issuer_pid
            .as_deref()
            .is_some_and(|pid| pid != message.issuer_pid)
        {
            return Err(HolderError::InvalidRequest(format!(
                "issuer pid '{}' does not belong to request '{}'",
                message.issuer_pid, message.holder_pid
            )));
        }
        Ok(request)
    }

    async fn verify(
        &self,
        request: &HolderCredentialRequest,
        message: &CredentialMessage,
    ) -> Result<Vec<VerifiableCredentialContainer>, HolderError> {
        let mut containers = Vec::with_capacity(message.credentials.len());
        for envelope in &message.credentials {
            containers.push(
                self.verifier
                    .verify(&request.issuer_did, &envelope.payload, envelope.format)
                    .await?,
            );
        }
        Ok(containers)
    }

    fn existing(&self, participant_context_id: &str, credential_id: &str) -> Result<Option<String>, CoreError> {
        let found = self.credentials.query(&QuerySpec::new(vec![
            Criterion::eq("participantContextId", participant_context_id),
            Criterion::eq("verifiableCredential.credential.id", credential_id),
        ]))?;
        Ok(found.into_iter().next().map(|r| r.id))
    }

    /// Verify the delivered credentials, store them as ISSUED and move the
    /// request to ISSUED. Returns the ids of the stored resources.
    ///
    /// Nothing is stored unless every credential verifies. Redelivery is
    /// harmless: credentials already stored are skipped. When the request is
    /// busy the transition is left to the status poll.
    pub async fn receive(
        &self,
        participant_context_id: &str,
        message: &CredentialMessage,
    ) -> Result<Vec<String>, HolderError> {
        if message.status != DcpRequestStatus::Issued {
            return Err(HolderError::InvalidRequest(format!(
                "credential message has status {}",
                message.status
            )));
        }
        if message.credentials.is_empty() {
            return Err(HolderError::InvalidRequest("credential message carries no credentials".into()));
        }
        let request = self.request(participant_context_id, message)?;
        let containers = self.verify(&request, message).await?;

        let now = self.clock.now();
        let (stored, created) = in_transaction(self.tx.as_ref(), || {
            let mut stored = Vec::with_capacity(containers.len());
            let mut created = Vec::new();
            for container in &containers {
                if let Some(id) = self.existing(participant_context_id, &container.credential.id)? {
                    stored.push(id);
                    continue;
                }
                let resource =
                    VerifiableCredentialResource::new(participant_context_id, container.clone(), VcStatus::Issued, now)
                        .with_metadata("holderPid", &message.holder_pid)
                        .with_metadata("issuerPid", &message.issuer_pid);
                stored.push(resource.id.clone());
                created.push(resource.id.clone());
                self.credentials.create(resource)?;
            }
            Ok((stored, created))
        })?;

        tracing::info!(
            participant = %participant_context_id,
            holder_pid = %message.holder_pid,
            stored = created.len(),
            redelivered = stored.len() - created.len(),
            "credentials received"
        );
        if !created.is_empty() {
            self.events.publish(EngineEvent::CredentialsStored {
                participant_context_id: participant_context_id.to_string(),
                holder_pid: Some(message.holder_pid.clone()),
                credential_ids: created,
            });
        }

        if request.state() == HolderRequestState::Requested {
            self.complete(&message.holder_pid);
        }
        Ok(stored)
    }

    fn complete(&self, holder_pid: &str) {
        let result = self.update.apply(holder_pid, |request| {
            if request.state() != HolderRequestState::Requested {
                return Ok(false);
            }
            request.meta_mut().transition_to(HolderRequestState::Issued, self.clock.now())?;
            Ok(true)
        });
        match result {
            Ok((_, true)) => self.events.publish(EngineEvent::HolderRequestTransitioned {
                holder_pid: holder_pid.to_string(),
                state: HolderRequestState::Issued,
            }),
            Ok((_, false)) => {}
            Err(CoreError::Conflict(_)) => {
                tracing::debug!(holder_pid = %holder_pid, "request busy, completion left to status poll");
            }
            Err(e) => tracing::warn!(holder_pid = %holder_pid, error = %e, "could not complete request"),
        }
    }
}
