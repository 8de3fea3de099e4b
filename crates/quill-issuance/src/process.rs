use std::sync::Arc;

use async_trait::async_trait;
use quill_core::claims;
use quill_core::{
    CoreError, CredentialDefinition, Holder, IssuanceProcess, IssuanceProcessState, StatefulEntity, VcStatus,
    VerifiableCredentialResource,
};
use quill_statemachine::{EntityHandler, ProcessContext, ProcessOutcome};
use quill_store::{Repository, StoreError};

use crate::attestation::{AttestationContext, AttestationPipeline};
use crate::delivery::CredentialStorageClient;
use crate::error::IssuanceError;
use crate::generator::{CredentialGenerationRequest, CredentialGeneratorRegistry};
use crate::rules::RuleEngine;
use crate::status::StatusListService;

/// SUBMITTED → APPROVED: attest, check rules, generate credentials.
pub struct SubmittedHandler {
    definitions: Arc<dyn Repository<CredentialDefinition>>,
    holders: Arc<dyn Repository<Holder>>,
    attestations: Arc<AttestationPipeline>,
    rules: Arc<RuleEngine>,
    generators: Arc<CredentialGeneratorRegistry>,
}

impl SubmittedHandler {
    pub fn new(
        definitions: Arc<dyn Repository<CredentialDefinition>>,
        holders: Arc<dyn Repository<Holder>>,
        attestations: Arc<AttestationPipeline>,
        rules: Arc<RuleEngine>,
        generators: Arc<CredentialGeneratorRegistry>,
    ) -> Self {
        Self {
            definitions,
            holders,
            attestations,
            rules,
            generators,
        }
    }

    async fn approve(&self, mut process: IssuanceProcess) -> Result<IssuanceProcess, IssuanceError> {
        let definitions = process
            .credential_definitions
            .iter()
            .map(|id| {
                self.definitions
                    .find_by_id(id)?
                    .ok_or_else(|| IssuanceError::not_found("credential definition", id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut attestation_ids: Vec<String> = Vec::new();
        for id in definitions.iter().flat_map(|d| d.attestations.iter()) {
            if !attestation_ids.contains(id) {
                attestation_ids.push(id.clone());
            }
        }
        if attestation_ids.is_empty() {
            return Err(IssuanceError::BadRequest(
                "no attestations configured for the requested credentials".into(),
            ));
        }

        let holder = self
            .holders
            .find_by_id(&process.holder_id)?
            .ok_or_else(|| IssuanceError::not_found("holder", &process.holder_id))?;
        let ctx = AttestationContext::new(&process.participant_context_id, holder).with_claims(process.claims.clone());
        let attested = self.attestations.evaluate(&attestation_ids, &ctx).await?;

        let mut merged = process.claims.clone();
        claims::merge(&mut merged, attested);

        let rules: Vec<_> = definitions.iter().flat_map(|d| d.rules.iter().cloned()).collect();
        self.rules.evaluate(&rules, &merged)?;

        let requests = definitions
            .into_iter()
            .map(|definition| {
                let format = process
                    .credential_formats
                    .get(&definition.id)
                    .copied()
                    .ok_or_else(|| IssuanceError::BadRequest(format!("no format requested for '{}'", definition.id)))?;
                Ok(CredentialGenerationRequest::new(definition, format))
            })
            .collect::<Result<Vec<_>, IssuanceError>>()?;

        process.credentials = self
            .generators
            .generate_credentials(&process.participant_context_id, &process.holder_id, &requests, &merged)
            .await?;
        process.claims = merged;
        Ok(process)
    }
}

#[async_trait]
impl EntityHandler<IssuanceProcess> for SubmittedHandler {
    fn name(&self) -> &'static str {
        "issuance-submitted"
    }

    fn states(&self) -> Vec<IssuanceProcessState> {
        vec![IssuanceProcessState::Submitted]
    }

    async fn handle(&self, process: IssuanceProcess, ctx: &ProcessContext<IssuanceProcess>) -> ProcessOutcome<IssuanceProcess> {
        match self.approve(process.clone()).await {
            Ok(approved) => {
                tracing::info!(
                    process_id = %approved.id(),
                    credentials = approved.credentials.len(),
                    "issuance approved"
                );
                ProcessOutcome::transition(approved, IssuanceProcessState::Approved, ctx.now())
            }
            Err(err) => ProcessOutcome::failed(process, err),
        }
    }
}

/// APPROVED → DELIVERED: status list entries, delivery, issuer-side record.
pub struct ApprovedHandler {
    status_lists: Arc<StatusListService>,
    generators: Arc<CredentialGeneratorRegistry>,
    storage: Arc<dyn CredentialStorageClient>,
    credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
}

impl ApprovedHandler {
    pub fn new(
        status_lists: Arc<StatusListService>,
        generators: Arc<CredentialGeneratorRegistry>,
        storage: Arc<dyn CredentialStorageClient>,
        credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
    ) -> Self {
        Self {
            status_lists,
            generators,
            storage,
            credentials,
        }
    }

    /// Add status entries to credentials that lack them and re-sign. Returns
    /// whether anything changed.
    async fn enrich(&self, process: &mut IssuanceProcess) -> Result<bool, IssuanceError> {
        let mut changed = false;
        for container in process.credentials.iter_mut() {
            if !container.credential.credential_status.is_empty() {
                continue;
            }
            let credential = self
                .status_lists
                .add_credential(&process.participant_context_id, container.credential.clone())?;
            *container = self
                .generators
                .sign_credential(&process.participant_context_id, &credential, container.format)
                .await?;
            changed = true;
        }
        Ok(changed)
    }

    fn record(&self, process: &IssuanceProcess, ctx: &ProcessContext<IssuanceProcess>) -> Result<(), IssuanceError> {
        for container in &process.credentials {
            let mut resource = VerifiableCredentialResource::new(
                &process.participant_context_id,
                container.clone(),
                VcStatus::Issued,
                ctx.now(),
            );
            resource.id = container.credential.id.clone();
            resource.holder_id = process.holder_id.clone();
            match self.credentials.create(resource) {
                Ok(()) | Err(StoreError::AlreadyExists { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn deliver(
        &self,
        process: &mut IssuanceProcess,
        ctx: &ProcessContext<IssuanceProcess>,
    ) -> Result<(), IssuanceError> {
        if process.credentials.is_empty() {
            return Err(IssuanceError::BadRequest("approved process has no credentials".into()));
        }
        if self.enrich(process).await? {
            // A delivery retry must reuse these status list entries.
            ctx.checkpoint(process)?;
        }
        self.storage.deliver_credentials(process, &process.credentials).await?;
        self.record(process, ctx)
    }
}

#[async_trait]
impl EntityHandler<IssuanceProcess> for ApprovedHandler {
    fn name(&self) -> &'static str {
        "issuance-approved"
    }

    fn states(&self) -> Vec<IssuanceProcessState> {
        vec![IssuanceProcessState::Approved]
    }

    async fn handle(&self, process: IssuanceProcess, ctx: &ProcessContext<IssuanceProcess>) -> ProcessOutcome<IssuanceProcess> {
        let mut working = process.clone();
        match self.deliver(&mut working, ctx).await {
            Ok(()) => ProcessOutcome::transition(working, IssuanceProcessState::Delivered, ctx.now()),
            Err(err) => {
                let err = CoreError::from(err);
                tracing::warn!(process_id = %process.id(), error = %err, "delivery attempt failed");
                ProcessOutcome::failed(working, err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::fixture;
    use chrono::Utc;
    use quill_core::dcp::CredentialMessage;
    use quill_core::{
        AttestationDefinition, CredentialFormat, ManualClock, MappingDefinition, RuleDefinition, StateMachineConfig,
    };
    use quill_statemachine::StateMachineRuntime;
    use quill_store::{InMemoryRepository, InMemoryStateEntityStore, StateEntityStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStorage {
        delivered: Mutex<Vec<CredentialMessage>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl CredentialStorageClient for RecordingStorage {
        async fn deliver_credentials(
            &self,
            process: &IssuanceProcess,
            credentials: &[quill_core::VerifiableCredentialContainer],
        ) -> Result<(), IssuanceError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(IssuanceError::Delivery("holder offline".into()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push(crate::delivery::credential_message(process, credentials));
            Ok(())
        }
    }

    struct World {
        store: Arc<InMemoryStateEntityStore<IssuanceProcess>>,
        runtime: StateMachineRuntime<IssuanceProcess>,
        storage: Arc<RecordingStorage>,
        issued: Arc<InMemoryRepository<VerifiableCredentialResource>>,
    }

    async fn world(min_age: i64) -> World {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryStateEntityStore::<IssuanceProcess>::new(clock.clone()));

        let definitions = InMemoryRepository::<CredentialDefinition>::new();
        let mut def = CredentialDefinition::new("def-1", "issuer", "MembershipCredential");
        def.attestations = vec!["holder-db".into()];
        def.rules = vec![RuleDefinition::expression("age", "GEQ", min_age)];
        def.mappings = vec![MappingDefinition::new("age", "credentialSubject.age", true)];
        definitions.create(def).unwrap();

        let attestation_defs = InMemoryRepository::<AttestationDefinition>::new();
        attestation_defs
            .create(AttestationDefinition::new("holder-db", "holder", "issuer", json!({"required": ["age"]})))
            .unwrap();

        let holders = InMemoryRepository::<Holder>::new();
        let mut holder = Holder::new("holder-1", "issuer", "did:web:holder");
        holder.properties.insert("age".into(), json!(21));
        holders.create(holder).unwrap();
        let holders: Arc<dyn Repository<Holder>> = Arc::new(holders);

        let f = fixture().await;
        let issued = Arc::new(InMemoryRepository::<VerifiableCredentialResource>::new());
        let status_lists = Arc::new(StatusListService::new("https://issuer", issued.clone(), clock.clone()));
        let storage = Arc::new(RecordingStorage::default());
        let generators = Arc::new(f.registry);

        let submitted = SubmittedHandler::new(
            Arc::new(definitions),
            holders,
            Arc::new(AttestationPipeline::with_builtin_sources(Arc::new(attestation_defs))),
            Arc::new(RuleEngine::default()),
            generators.clone(),
        );
        let approved = ApprovedHandler::new(status_lists, generators, storage.clone(), issued.clone());

        let config = StateMachineConfig {
            retry_limit: 2,
            ..StateMachineConfig::default()
        };
        let runtime = StateMachineRuntime::<IssuanceProcess>::builder("issuance", store.clone())
            .handler(Arc::new(submitted))
            .handler(Arc::new(approved))
            .config(config)
            .clock(clock)
            .build()
            .unwrap();
        World {
            store,
            runtime,
            storage,
            issued,
        }
    }

    fn submit(store: &InMemoryStateEntityStore<IssuanceProcess>) -> String {
        let process = IssuanceProcess::new("issuer", "holder-1", "hpid-1", Utc::now())
            .with_definition("def-1", CredentialFormat::Vc1Jwt);
        let id = process.id().to_string();
        store.create(process).unwrap();
        id
    }

    #[tokio::test]
    async fn test_submitted_to_delivered() {
        let w = world(18).await;
        let id = submit(&w.store);

        let report = w.runtime.tick().await;
        assert_eq!(report.transitioned, 2);
        let process = w.store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(process.state(), IssuanceProcessState::Delivered);
        assert_eq!(process.credentials.len(), 1);
        let credential = &process.credentials[0].credential;
        assert_eq!(credential.credential_subject[0].claims["age"], 21);
        assert_eq!(credential.credential_status.len(), 1);

        let delivered = w.storage.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].holder_pid, "hpid-1");
        let payload = crate::generator::decode_credential(&delivered[0].credentials[0].payload, CredentialFormat::Vc1Jwt)
            .unwrap();
        assert_eq!(payload.credential.credential_status.len(), 1);

        let record = w.issued.find_by_id(&credential.id).unwrap().unwrap();
        assert_eq!(record.state, VcStatus::Issued);
        assert_eq!(record.holder_id, "holder-1");
    }

    #[tokio::test]
    async fn test_rule_failure_errors_immediately() {
        let w = world(30).await;
        let id = submit(&w.store);
        let report = w.runtime.tick().await;
        assert_eq!(report.escalated, 1);
        let process = w.store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(process.state(), IssuanceProcessState::Errored);
        assert!(process.meta.error_detail.as_deref().unwrap().contains("age"));
        assert!(w.storage.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_retry_keeps_status_entry() {
        let w = world(18).await;
        let id = submit(&w.store);

        w.storage.fail.store(true, Ordering::SeqCst);
        let report = w.runtime.tick().await;
        assert_eq!(report.retried, 1);
        let process = w.store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(process.state(), IssuanceProcessState::Approved);
        assert_eq!(process.meta.state_count(), 1);
        let first_entry = process.credentials[0].credential.credential_status[0].clone();

        w.store.break_lease(&id).unwrap();
        w.storage.fail.store(false, Ordering::SeqCst);
        w.runtime.tick().await;
        let process = w.store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(process.state(), IssuanceProcessState::Delivered);
        assert_eq!(process.credentials[0].credential.credential_status[0], first_entry);
    }

    #[tokio::test]
    async fn test_delivery_exhausts_retries() {
        let w = world(18).await;
        let id = submit(&w.store);
        w.storage.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            w.runtime.tick().await;
            w.store.break_lease(&id).unwrap();
        }
        let process = w.store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(process.state(), IssuanceProcessState::Errored);
        let detail = process.meta.error_detail.clone().unwrap();
        assert!(detail.starts_with("retry limit of 2 exceeded"), "{detail}");
    }
}
