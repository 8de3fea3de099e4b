//! The Quill node orchestrator.
//!
//! Builds the in-memory stores, the issuer and holder engines and their
//! state-machine runtimes, then runs the runtimes, the offer listener and the
//! credential watchdog as background tasks until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use quill_core::{
    AttestationDefinition, Clock, CredentialDefinition, EventBus, Holder, HolderCredentialRequest, IssuanceProcess,
    KeyPairResource, NoopTransactionContext, ParticipantContext, SystemClock, TransactionContext,
    VerifiableCredentialResource,
};
use quill_crypto::{InMemoryVault, ParticipantKeys, Vault};
use quill_holder::{
    CachingStatusListResolver, CredentialQueryResolver, CredentialReceiver, CredentialRequestManager,
    CredentialStatusCheck, CredentialWatchdog, HttpIssuerClient, HttpStatusListResolver, IssuerClient, OfferListener,
    ParticipantKeyResolver, RequestCredentialsHandler, RequestStatusHandler, ScopeTransformer, StaticEndpointResolver,
    StatusListRevocationService,
};
use quill_issuance::{
    ApprovedHandler, AttestationPipeline, CredentialGeneratorRegistry, HttpCredentialStorageClient,
    IssuanceRequestService, JwtCredentialGenerator, LdpCredentialGenerator, RuleEngine, StatusListService,
    SubmittedHandler,
};
use quill_statemachine::{RuntimeHandle, StateMachineRuntime};
use quill_store::{InMemoryRepository, InMemoryStateEntityStore, Repository, StateEntityStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::QuillConfig;

/// A Quill node running one issuer and one holder participant.
pub struct QuillNode {
    config: QuillConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    keys: ParticipantKeys,
    participants: Arc<InMemoryRepository<ParticipantContext>>,
    issuance_requests: Arc<IssuanceRequestService>,
    status_lists: Arc<StatusListService>,
    request_manager: Arc<CredentialRequestManager>,
    receiver: Arc<CredentialReceiver>,
    query_resolver: Arc<CredentialQueryResolver>,
    watchdog: Arc<CredentialWatchdog>,
    offer_listener: Arc<OfferListener>,
    /// Runtimes waiting to be started.
    pending: Option<(
        StateMachineRuntime<IssuanceProcess>,
        StateMachineRuntime<HolderCredentialRequest>,
    )>,
    runtimes: Vec<RuntimeHandle>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl QuillNode {
    /// Wire every component from `config`. Nothing runs until `start`.
    pub fn new(config: QuillConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tx: Arc<dyn TransactionContext> = Arc::new(NoopTransactionContext);
        let events = EventBus::default();
        let http = reqwest::Client::new();

        // Shared directories
        let participants = Arc::new(InMemoryRepository::<ParticipantContext>::new());
        participants.create(ParticipantContext::new(&config.issuer.participant_context_id, &config.issuer.did))?;
        participants.create(ParticipantContext::new(&config.holder.participant_context_id, &config.holder.did))?;
        let vault: Arc<dyn Vault> = Arc::new(InMemoryVault::new());
        let keys = ParticipantKeys::new(Arc::new(InMemoryRepository::<KeyPairResource>::new()), vault.clone());

        // Issuer side
        let definitions = Arc::new(InMemoryRepository::<CredentialDefinition>::new());
        for definition in &config.seed.credential_definitions {
            definitions.create(definition.clone())?;
        }
        let attestation_definitions = Arc::new(InMemoryRepository::<AttestationDefinition>::new());
        for definition in &config.seed.attestation_definitions {
            attestation_definitions.create(definition.clone())?;
        }
        let holders = Arc::new(InMemoryRepository::<Holder>::new());
        for holder in &config.seed.holders {
            holders.create(holder.clone())?;
        }
        let issued = Arc::new(InMemoryRepository::<VerifiableCredentialResource>::new());
        let processes: Arc<dyn StateEntityStore<IssuanceProcess>> =
            Arc::new(InMemoryStateEntityStore::new(clock.clone()));

        let mut generators = CredentialGeneratorRegistry::new(participants.clone(), holders.clone(), keys.clone());
        generators.register(Arc::new(JwtCredentialGenerator::new(vault.clone(), clock.clone())));
        generators.register(Arc::new(LdpCredentialGenerator::new(vault, clock.clone())));
        let generators = Arc::new(generators);

        let status_lists = Arc::new(
            StatusListService::new(&config.issuer.status_list_base_url, issued.clone(), clock.clone())
                .with_list_size(config.issuer.status_list_size),
        );
        let storage = HttpCredentialStorageClient::new(
            http.clone(),
            participants.clone(),
            holders.clone(),
            keys.clone(),
            clock.clone(),
        )
        .with_token_ttl(Duration::from_secs(config.issuer.token_ttl_secs));

        let issuance_requests = Arc::new(IssuanceRequestService::new(
            processes.clone(),
            definitions.clone(),
            holders.clone(),
            tx.clone(),
            clock.clone(),
        ));
        let issuance_runtime = StateMachineRuntime::<IssuanceProcess>::builder("issuance", processes)
            .handler(Arc::new(SubmittedHandler::new(
                definitions,
                holders,
                Arc::new(AttestationPipeline::with_builtin_sources(attestation_definitions)),
                Arc::new(RuleEngine::default()),
                generators.clone(),
            )))
            .handler(Arc::new(ApprovedHandler::new(
                status_lists.clone(),
                generators,
                Arc::new(storage),
                issued,
            )))
            .config(config.issuer.state_machine.clone())
            .clock(clock.clone())
            .build()?;

        // Holder side
        let requests: Arc<dyn StateEntityStore<HolderCredentialRequest>> =
            Arc::new(InMemoryStateEntityStore::new(clock.clone()));
        let held = Arc::new(InMemoryRepository::<VerifiableCredentialResource>::new());
        let endpoints = config
            .holder
            .issuer_endpoints
            .iter()
            .fold(StaticEndpointResolver::new(), |resolver, (did, url)| resolver.with_endpoint(did, url));
        let issuer_client: Arc<dyn IssuerClient> = Arc::new(
            HttpIssuerClient::new(
                http.clone(),
                Arc::new(endpoints),
                participants.clone(),
                keys.clone(),
                clock.clone(),
            )
            .with_token_ttl(Duration::from_secs(config.holder.token_ttl_secs)),
        );
        let request_manager = Arc::new(CredentialRequestManager::new(requests.clone(), tx.clone(), clock.clone()));
        let receiver = Arc::new(CredentialReceiver::new(
            requests.clone(),
            held.clone(),
            Arc::new(ParticipantKeyResolver::new(participants.clone(), keys.clone())),
            tx.clone(),
            events.clone(),
            clock.clone(),
            config.holder.state_machine.lease_duration(),
        ));
        let holder_runtime = StateMachineRuntime::<HolderCredentialRequest>::builder("holder-requests", requests)
            .handler(Arc::new(RequestCredentialsHandler::new(issuer_client.clone())))
            .handler(Arc::new(
                RequestStatusHandler::new(issuer_client, Duration::from_secs(config.holder.status_poll_interval_secs))
                    .with_timeout(Duration::from_secs(config.holder.request_timeout_secs)),
            ))
            .config(config.holder.state_machine.clone())
            .clock(clock.clone())
            .build()?;

        let status_resolver = Arc::new(CachingStatusListResolver::new(
            Arc::new(HttpStatusListResolver::new(http)),
            Duration::from_secs(config.holder.status_list_cache_secs),
            clock.clone(),
        ));
        let revocation = Arc::new(StatusListRevocationService::new(status_resolver));
        let query_resolver = Arc::new(CredentialQueryResolver::new(
            held.clone(),
            ScopeTransformer::new(config.holder.scope_aliases.iter().cloned()),
            revocation.clone(),
            clock.clone(),
        ));
        let watchdog = Arc::new(
            CredentialWatchdog::new(
                held,
                CredentialStatusCheck::new(revocation, clock.clone()),
                events.clone(),
                tx,
                clock.clone(),
            )
            .with_reissuance(request_manager.clone(), Duration::from_secs(config.holder.reissue_grace_secs)),
        );
        let offer_listener = Arc::new(OfferListener::new(request_manager.clone()));

        let (shutdown_tx, _) = watch::channel(false);
        tracing::info!(
            issuer = %config.issuer.did,
            holder = %config.holder.did,
            credential_definitions = config.seed.credential_definitions.len(),
            "Quill node created"
        );

        Ok(Self {
            config,
            clock,
            events,
            keys,
            participants,
            issuance_requests,
            status_lists,
            request_manager,
            receiver,
            query_resolver,
            watchdog,
            offer_listener,
            pending: Some((issuance_runtime, holder_runtime)),
            runtimes: Vec::new(),
            tasks: Vec::new(),
            shutdown_tx,
        })
    }

    /// Give each participant a default signing key.
    async fn provision_keys(&self) -> Result<()> {
        for participant in [&self.config.issuer.participant_context_id, &self.config.holder.participant_context_id] {
            if self.keys.active_key_pair(participant).is_ok() {
                continue;
            }
            self.keys.create_key_pair(participant, "key-1", true).await?;
        }
        Ok(())
    }

    /// Provision keys and start the runtimes, offer listener and watchdog.
    pub async fn start(&mut self) -> Result<()> {
        let (issuance, holder) = self
            .pending
            .take()
            .ok_or_else(|| anyhow::anyhow!("node already started"))?;
        tracing::info!("starting Quill node");
        self.provision_keys().await?;

        self.runtimes.push(issuance.start());
        self.runtimes.push(holder.start());
        self.tasks.push(
            self.offer_listener
                .clone()
                .spawn(&self.events, self.shutdown_tx.subscribe()),
        );
        self.tasks.push(self.watchdog.clone().spawn(
            Duration::from_secs(self.config.holder.watchdog_interval_secs.max(1)),
            self.shutdown_tx.subscribe(),
        ));
        tracing::info!(runtimes = self.runtimes.len(), tasks = self.tasks.len(), "Quill node started");
        Ok(())
    }

    /// Stop background tasks, letting in-flight ticks finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down Quill node");
        // No receivers is fine: nothing was started.
        let _ = self.shutdown_tx.send(true);
        for handle in self.runtimes.drain(..) {
            handle.shutdown().await;
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        Ok(())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn participants(&self) -> &Arc<InMemoryRepository<ParticipantContext>> {
        &self.participants
    }

    pub fn issuance_requests(&self) -> &Arc<IssuanceRequestService> {
        &self.issuance_requests
    }

    pub fn status_lists(&self) -> &Arc<StatusListService> {
        &self.status_lists
    }

    pub fn request_manager(&self) -> &Arc<CredentialRequestManager> {
        &self.request_manager
    }

    pub fn receiver(&self) -> &Arc<CredentialReceiver> {
        &self.receiver
    }

    pub fn query_resolver(&self) -> &Arc<CredentialQueryResolver> {
        &self.query_resolver
    }
}
