//! Shared fixtures for the Quill integration tests.
//!
//! `World` runs an issuer and a holder engine in one process. The holder's
//! issuer client calls the issuance request service directly, and the
//! issuer's delivery client hands credential messages straight to the holder
//! receiver, so a whole DCP exchange can be driven tick by tick.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quill_core::dcp::{CredentialRequestResponse, CredentialRequestStatus};
use quill_core::{
    AttestationDefinition, Clock, CredentialDefinition, CredentialFormat, EventBus, Holder, HolderCredentialRequest,
    IssuanceProcess, KeyPairResource, ManualClock, MappingDefinition, NoopTransactionContext, ParticipantContext,
    QuerySpec, RuleDefinition, StateMachineConfig, TransactionContext, VerifiableCredentialContainer,
    VerifiableCredentialResource,
};
use quill_crypto::{InMemoryVault, ParticipantKeys, Vault};
use quill_holder::client::request_message;
use quill_holder::{
    CredentialQueryResolver, CredentialReceiver, CredentialRequestManager, HolderError, IssuerClient,
    ParticipantKeyResolver, RequestCredentialsHandler, RequestStatusHandler, ScopeTransformer,
    StatusListRevocationService,
};
use quill_issuance::delivery::credential_message;
use quill_issuance::{
    ApprovedHandler, AttestationPipeline, CredentialGeneratorRegistry, CredentialStorageClient, IssuanceError,
    IssuanceRequestService, JwtCredentialGenerator, LdpCredentialGenerator, RuleEngine, StatusListService,
    SubmittedHandler,
};
use quill_statemachine::{FixedWait, StateMachineRuntime};
use quill_store::{InMemoryRepository, InMemoryStateEntityStore, Repository};
use serde_json::json;
use tokio::sync::Notify;

pub const ISSUER: &str = "issuer";
pub const ISSUER_DID: &str = "did:web:issuer.example.com";
pub const HOLDER: &str = "holder";
pub const HOLDER_DID: &str = "did:web:holder.example.com";
pub const HOLDER_RECORD: &str = "holder-1";
pub const MEMBERSHIP: &str = "MembershipCredential";
pub const MEMBERSHIP_SCOPE: &str = "org.eclipse.edc.vc.type:MembershipCredential:read";
pub const RETRY_LIMIT: u32 = 2;
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Parks the next status answer until released.
#[derive(Clone, Default)]
pub struct StatusPause {
    /// Notified once the status has been read and the answer is parked.
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// The holder's view of the issuer, answered in-process.
pub struct LoopbackIssuer {
    service: Arc<IssuanceRequestService>,
    offline: AtomicBool,
    pause: Mutex<Option<StatusPause>>,
}

impl LoopbackIssuer {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold the next `request_status` answer, read before the pause, until
    /// `release` is notified.
    pub fn pause_next_status(&self) -> StatusPause {
        let pause = StatusPause::default();
        *self.pause.lock().unwrap() = Some(pause.clone());
        pause
    }

    fn check_online(&self) -> Result<(), HolderError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(HolderError::Issuer("issuer unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IssuerClient for LoopbackIssuer {
    async fn request_credentials(
        &self,
        request: &HolderCredentialRequest,
    ) -> Result<CredentialRequestResponse, HolderError> {
        self.check_online()?;
        Ok(self
            .service
            .initiate_issuance(ISSUER, HOLDER_DID, &request_message(request))?)
    }

    async fn request_status(
        &self,
        _request: &HolderCredentialRequest,
        issuer_pid: &str,
    ) -> Result<CredentialRequestStatus, HolderError> {
        self.check_online()?;
        let status = self.service.request_status(ISSUER, HOLDER_DID, issuer_pid)?;
        let pause = self.pause.lock().unwrap().take();
        if let Some(pause) = pause {
            pause.reached.notify_one();
            pause.release.notified().await;
        }
        Ok(status)
    }
}

/// The issuer's delivery target: the holder's receiver.
pub struct LoopbackStorage {
    receiver: Arc<CredentialReceiver>,
    offline: AtomicBool,
}

impl LoopbackStorage {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStorageClient for LoopbackStorage {
    async fn deliver_credentials(
        &self,
        process: &IssuanceProcess,
        credentials: &[VerifiableCredentialContainer],
    ) -> Result<(), IssuanceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IssuanceError::Delivery("holder credential service unreachable".into()));
        }
        self.receiver
            .receive(HOLDER, &credential_message(process, credentials))
            .await
            .map(|_| ())
            .map_err(|e| IssuanceError::Delivery(e.to_string()))
    }
}

/// One issuer and one holder sharing a manual clock.
pub struct World {
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub holders: Arc<InMemoryRepository<Holder>>,
    pub processes: Arc<InMemoryStateEntityStore<IssuanceProcess>>,
    pub issued: Arc<InMemoryRepository<VerifiableCredentialResource>>,
    pub status_lists: Arc<StatusListService>,
    pub storage: Arc<LoopbackStorage>,
    pub issuance: StateMachineRuntime<IssuanceProcess>,
    pub requests: Arc<InMemoryStateEntityStore<HolderCredentialRequest>>,
    pub held: Arc<InMemoryRepository<VerifiableCredentialResource>>,
    pub issuer_client: Arc<LoopbackIssuer>,
    pub manager: CredentialRequestManager,
    pub holder: StateMachineRuntime<HolderCredentialRequest>,
    pub resolver: CredentialQueryResolver,
}

/// Issued to holders whose `level` property is "gold", valid for an hour.
pub fn membership_definition() -> CredentialDefinition {
    let mut definition = CredentialDefinition::new("membership", ISSUER, MEMBERSHIP);
    definition.validity = 3600;
    definition.attestations = vec!["holder-db".into()];
    definition.rules = vec![RuleDefinition::expression("level", "EQ", "gold")];
    definition.mappings = vec![MappingDefinition::new("level", "credentialSubject.level", true)];
    definition
}

pub fn membership_types() -> BTreeMap<String, CredentialFormat> {
    BTreeMap::from([(MEMBERSHIP.to_string(), CredentialFormat::Vc1Jwt)])
}

fn runtime_config() -> StateMachineConfig {
    StateMachineConfig {
        retry_limit: RETRY_LIMIT,
        ..StateMachineConfig::default()
    }
}

impl World {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let tx: Arc<dyn TransactionContext> = Arc::new(NoopTransactionContext);
        let events = EventBus::default();

        let participants = Arc::new(InMemoryRepository::<ParticipantContext>::new());
        participants.create(ParticipantContext::new(ISSUER, ISSUER_DID)).unwrap();
        participants.create(ParticipantContext::new(HOLDER, HOLDER_DID)).unwrap();
        let vault: Arc<dyn Vault> = Arc::new(InMemoryVault::new());
        let keys = ParticipantKeys::new(Arc::new(InMemoryRepository::<KeyPairResource>::new()), vault.clone());
        keys.create_key_pair(ISSUER, "key-1", true).await.unwrap();

        // Issuer
        let definitions = Arc::new(InMemoryRepository::<CredentialDefinition>::new());
        definitions.create(membership_definition()).unwrap();
        let attestations = Arc::new(InMemoryRepository::<AttestationDefinition>::new());
        attestations
            .create(AttestationDefinition::new("holder-db", "holder", ISSUER, json!({"required": ["level"]})))
            .unwrap();
        let holders = Arc::new(InMemoryRepository::<Holder>::new());
        let mut holder = Holder::new(HOLDER_RECORD, ISSUER, HOLDER_DID);
        holder.properties.insert("level".into(), json!("gold"));
        holders.create(holder).unwrap();

        let mut generators = CredentialGeneratorRegistry::new(participants.clone(), holders.clone(), keys.clone());
        generators.register(Arc::new(JwtCredentialGenerator::new(vault.clone(), dyn_clock.clone())));
        generators.register(Arc::new(LdpCredentialGenerator::new(vault, dyn_clock.clone())));
        let generators = Arc::new(generators);

        let processes = Arc::new(InMemoryStateEntityStore::<IssuanceProcess>::new(dyn_clock.clone()));
        let issued = Arc::new(InMemoryRepository::<VerifiableCredentialResource>::new());
        let status_lists = Arc::new(StatusListService::new(
            "https://issuer.example.com/api",
            issued.clone(),
            dyn_clock.clone(),
        ));
        let service = Arc::new(IssuanceRequestService::new(
            processes.clone(),
            definitions.clone(),
            holders.clone(),
            tx.clone(),
            dyn_clock.clone(),
        ));

        // Holder
        let requests = Arc::new(InMemoryStateEntityStore::<HolderCredentialRequest>::new(dyn_clock.clone()));
        let held = Arc::new(InMemoryRepository::<VerifiableCredentialResource>::new());
        let receiver = Arc::new(CredentialReceiver::new(
            requests.clone(),
            held.clone(),
            Arc::new(ParticipantKeyResolver::new(participants, keys)),
            tx.clone(),
            events.clone(),
            dyn_clock.clone(),
            runtime_config().lease_duration(),
        ));
        let storage = Arc::new(LoopbackStorage {
            receiver,
            offline: AtomicBool::new(false),
        });
        let issuer_client = Arc::new(LoopbackIssuer {
            service,
            offline: AtomicBool::new(false),
            pause: Mutex::new(None),
        });

        let issuance = StateMachineRuntime::<IssuanceProcess>::builder("issuance", processes.clone())
            .handler(Arc::new(SubmittedHandler::new(
                definitions,
                holders.clone(),
                Arc::new(AttestationPipeline::with_builtin_sources(attestations)),
                Arc::new(RuleEngine::default()),
                generators.clone(),
            )))
            .handler(Arc::new(ApprovedHandler::new(
                status_lists.clone(),
                generators,
                storage.clone(),
                issued.clone(),
            )))
            .config(runtime_config())
            .wait_strategy(Arc::new(FixedWait(Duration::ZERO)))
            .clock(dyn_clock.clone())
            .build()
            .unwrap();

        let holder = StateMachineRuntime::<HolderCredentialRequest>::builder("holder-requests", requests.clone())
            .handler(Arc::new(RequestCredentialsHandler::new(issuer_client.clone())))
            .handler(Arc::new(RequestStatusHandler::new(issuer_client.clone(), POLL_INTERVAL)))
            .config(runtime_config())
            .wait_strategy(Arc::new(FixedWait(Duration::ZERO)))
            .clock(dyn_clock.clone())
            .build()
            .unwrap();

        let manager = CredentialRequestManager::new(requests.clone(), tx, dyn_clock.clone());
        let resolver = CredentialQueryResolver::new(
            held.clone(),
            ScopeTransformer::default(),
            Arc::new(StatusListRevocationService::new(status_lists.clone())),
            dyn_clock,
        );

        World {
            clock,
            events,
            holders,
            processes,
            issued,
            status_lists,
            storage,
            issuance,
            requests,
            held,
            issuer_client,
            manager,
            holder,
            resolver,
        }
    }

    /// Create a holder request for a membership credential.
    pub fn request_membership(&self, holder_pid: &str) -> HolderCredentialRequest {
        self.manager
            .initiate_request(HOLDER, holder_pid, ISSUER_DID, membership_types())
            .unwrap()
    }

    /// Advance past the status poll hold and tick the holder runtime.
    pub async fn poll_holder(&self) {
        self.clock.advance(chrono::Duration::seconds(POLL_INTERVAL.as_secs() as i64 + 1));
        self.holder.tick().await;
    }

    pub fn request(&self, holder_pid: &str) -> HolderCredentialRequest {
        self.manager.find(holder_pid).unwrap().unwrap()
    }

    pub fn held_credentials(&self) -> Vec<VerifiableCredentialResource> {
        self.held.query(&QuerySpec::all()).unwrap()
    }
}
