use std::sync::Arc;

use quill_core::dcp::{CredentialRequestMessage, CredentialRequestResponse, CredentialRequestStatus, DcpRequestStatus};
use quill_core::{
    in_transaction, Clock, CoreError, CredentialDefinition, Criterion, Holder, IssuanceProcess, IssuanceProcessState, QuerySpec,
    StatefulEntity, TransactionContext,
};
use quill_store::{Repository, StateEntityStore};

use crate::error::IssuanceError;

/// Accepts DCP credential requests and answers status queries.
pub struct IssuanceRequestService {
    processes: Arc<dyn StateEntityStore<IssuanceProcess>>,
    definitions: Arc<dyn Repository<CredentialDefinition>>,
    holders: Arc<dyn Repository<Holder>>,
    tx: Arc<dyn TransactionContext>,
    clock: Arc<dyn Clock>,
}

impl IssuanceRequestService {
    pub fn new(
        processes: Arc<dyn StateEntityStore<IssuanceProcess>>,
        definitions: Arc<dyn Repository<CredentialDefinition>>,
        holders: Arc<dyn Repository<Holder>>,
        tx: Arc<dyn TransactionContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processes,
            definitions,
            holders,
            tx,
            clock,
        }
    }

    fn holder(&self, participant_context_id: &str, holder_did: &str) -> Result<Holder, IssuanceError> {
        self.holders
            .query(&QuerySpec::new(vec![
                Criterion::eq("participantContextId", participant_context_id),
                Criterion::eq("did", holder_did),
            ]))?
            .into_iter()
            .next()
            .ok_or_else(|| IssuanceError::Unauthorized(format!("'{holder_did}' is not a known holder")))
    }

    fn definition_for_type(
        &self,
        participant_context_id: &str,
        credential_type: &str,
    ) -> Result<CredentialDefinition, IssuanceError> {
        self.definitions
            .query(&QuerySpec::new(vec![
                Criterion::eq("participantContextId", participant_context_id),
                Criterion::eq("credentialType", credential_type),
            ]))?
            .into_iter()
            .next()
            .ok_or_else(|| IssuanceError::BadRequest(format!("no credential definition for type '{credential_type}'")))
    }

    fn existing_process(
        &self,
        participant_context_id: &str,
        holder_id: &str,
        holder_pid: &str,
    ) -> Result<Option<IssuanceProcess>, CoreError> {
        Ok(self
            .processes
            .query(&QuerySpec::new(vec![
                Criterion::eq("participantContextId", participant_context_id),
                Criterion::eq("holderId", holder_id),
                Criterion::eq("holderPid", holder_pid),
            ]))?
            .into_iter()
            .next())
    }

    /// Validate the request and create a SUBMITTED issuance process, or
    /// return the one already created for the same holder pid.
    pub fn initiate_issuance(
        &self,
        participant_context_id: &str,
        holder_did: &str,
        message: &CredentialRequestMessage,
    ) -> Result<CredentialRequestResponse, IssuanceError> {
        if message.credentials.is_empty() {
            return Err(IssuanceError::BadRequest("no credentials requested".into()));
        }
        if message.holder_pid.trim().is_empty() {
            return Err(IssuanceError::BadRequest("holderPid is required".into()));
        }
        let holder = self.holder(participant_context_id, holder_did)?;

        let mut process = IssuanceProcess::new(
            participant_context_id,
            holder.id.clone(),
            message.holder_pid.clone(),
            self.clock.now(),
        );
        for requested in &message.credentials {
            let definition = self.definition_for_type(participant_context_id, &requested.credential_type)?;
            if !definition.supports_format(requested.format) {
                return Err(IssuanceError::BadRequest(format!(
                    "format {} is not supported for credential type '{}'",
                    requested.format, requested.credential_type
                )));
            }
            process = process.with_definition(definition.id, requested.format);
        }

        // A redelivered request maps onto the process it already started.
        let (process, created) = in_transaction(self.tx.as_ref(), || {
            if let Some(existing) = self.existing_process(participant_context_id, &holder.id, &message.holder_pid)? {
                return Ok((existing, false));
            }
            self.processes.create(process.clone())?;
            Ok((process.clone(), true))
        })?;

        if created {
            tracing::info!(
                participant = %participant_context_id,
                holder = %holder.id,
                holder_pid = %message.holder_pid,
                process_id = %process.id(),
                "issuance process submitted"
            );
        } else {
            tracing::debug!(
                holder_pid = %message.holder_pid,
                process_id = %process.id(),
                "duplicate credential request mapped to existing process"
            );
        }
        Ok(CredentialRequestResponse {
            issuer_pid: process.id().to_string(),
        })
    }

    /// DCP status of a request; only visible to the holder that made it.
    pub fn request_status(
        &self,
        participant_context_id: &str,
        holder_did: &str,
        issuer_pid: &str,
    ) -> Result<CredentialRequestStatus, IssuanceError> {
        let holder = self.holder(participant_context_id, holder_did)?;
        let process = self
            .processes
            .find_by_id(issuer_pid)?
            .filter(|p| p.participant_context_id == participant_context_id && p.holder_id == holder.id)
            .ok_or_else(|| IssuanceError::not_found("issuance process", issuer_pid))?;

        let status = match process.state() {
            IssuanceProcessState::Submitted | IssuanceProcessState::Approved => DcpRequestStatus::Received,
            IssuanceProcessState::Delivered => DcpRequestStatus::Issued,
            IssuanceProcessState::Errored => DcpRequestStatus::Rejected,
        };
        Ok(CredentialRequestStatus {
            issuer_pid: issuer_pid.to_string(),
            holder_pid: process.holder_pid,
            status,
        })
    }
}
