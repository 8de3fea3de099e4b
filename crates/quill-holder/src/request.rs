use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::config::to_chrono;
use quill_core::dcp::DcpRequestStatus;
use quill_core::{
    in_transaction, Clock, CredentialFormat, HolderCredentialRequest, HolderRequestState, StatefulEntity,
    TransactionContext,
};
use quill_statemachine::{EntityHandler, ProcessContext, ProcessOutcome};
use quill_store::{StateEntityStore, StoreError};

use crate::client::IssuerClient;
use crate::error::HolderError;

/// Creates holder credential requests for the state machine to drive.
pub struct CredentialRequestManager {
    store: Arc<dyn StateEntityStore<HolderCredentialRequest>>,
    tx: Arc<dyn TransactionContext>,
    clock: Arc<dyn Clock>,
}

impl CredentialRequestManager {
    pub fn new(
        store: Arc<dyn StateEntityStore<HolderCredentialRequest>>,
        tx: Arc<dyn TransactionContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, tx, clock }
    }

    /// Create a CREATED request under `holder_pid`.
    ///
    /// Asking again with the same pid for the same participant returns the
    /// existing request, so redelivered offers do not fan out.
    pub fn initiate_request(
        &self,
        participant_context_id: &str,
        holder_pid: &str,
        issuer_did: &str,
        types_and_formats: BTreeMap<String, CredentialFormat>,
    ) -> Result<HolderCredentialRequest, HolderError> {
        if holder_pid.trim().is_empty() {
            return Err(HolderError::InvalidRequest("holder pid is required".into()));
        }
        let request = HolderCredentialRequest::new(
            holder_pid,
            participant_context_id,
            issuer_did,
            types_and_formats,
            self.clock.now(),
        )?;

        let created = in_transaction(self.tx.as_ref(), || match self.store.create(request.clone()) {
            Ok(()) => Ok(Some(request.clone())),
            Err(StoreError::AlreadyExists { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        })?;
        if let Some(request) = created {
            tracing::info!(
                participant = %participant_context_id,
                holder_pid = %holder_pid,
                issuer = %issuer_did,
                "holder credential request created"
            );
            return Ok(request);
        }

        let existing = self
            .store
            .find_by_id(holder_pid)?
            .ok_or_else(|| HolderError::not_found("holder credential request", holder_pid))?;
        if existing.participant_context_id != participant_context_id {
            return Err(HolderError::InvalidRequest(format!(
                "holder pid '{holder_pid}' belongs to another participant"
            )));
        }
        tracing::debug!(holder_pid = %holder_pid, state = %existing.state(), "request already exists");
        Ok(existing)
    }

    pub fn find(&self, holder_pid: &str) -> Result<Option<HolderCredentialRequest>, HolderError> {
        Ok(self.store.find_by_id(holder_pid)?)
    }
}

/// CREATED / REQUESTING: send the request to the issuer and remember its pid.
pub struct RequestCredentialsHandler {
    client: Arc<dyn IssuerClient>,
}

impl RequestCredentialsHandler {
    pub fn new(client: Arc<dyn IssuerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EntityHandler<HolderCredentialRequest> for RequestCredentialsHandler {
    fn name(&self) -> &'static str {
        "holder-request"
    }

    fn states(&self) -> Vec<HolderRequestState> {
        vec![HolderRequestState::Created, HolderRequestState::Requesting]
    }

    async fn handle(
        &self,
        mut request: HolderCredentialRequest,
        ctx: &ProcessContext<HolderCredentialRequest>,
    ) -> ProcessOutcome<HolderCredentialRequest> {
        if request.state() == HolderRequestState::Created {
            if let Err(e) = request.meta_mut().transition_to(HolderRequestState::Requesting, ctx.now()) {
                return ProcessOutcome::failed(request, e);
            }
            if let Err(e) = ctx.checkpoint(&request) {
                return ProcessOutcome::failed(request, e);
            }
        }

        match self.client.request_credentials(&request).await {
            Ok(response) => {
                request.issuer_pid = Some(response.issuer_pid);
                ProcessOutcome::transition(request, HolderRequestState::Requested, ctx.now())
            }
            Err(e) => {
                tracing::warn!(holder_pid = %request.holder_pid(), error = %e, "credential request failed");
                ProcessOutcome::failed(request, e)
            }
        }
    }
}

/// REQUESTED: poll the issuer until it reports the outcome or the request
/// times out.
pub struct RequestStatusHandler {
    client: Arc<dyn IssuerClient>,
    poll_interval: Duration,
    timeout: Duration,
}

impl RequestStatusHandler {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

    pub fn new(client: Arc<dyn IssuerClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl EntityHandler<HolderCredentialRequest> for RequestStatusHandler {
    fn name(&self) -> &'static str {
        "holder-requested"
    }

    fn states(&self) -> Vec<HolderRequestState> {
        vec![HolderRequestState::Requested]
    }

    async fn handle(
        &self,
        request: HolderCredentialRequest,
        ctx: &ProcessContext<HolderCredentialRequest>,
    ) -> ProcessOutcome<HolderCredentialRequest> {
        let now = ctx.now();
        if now - request.meta.state_timestamp() > to_chrono(self.timeout) {
            let holder_pid = request.holder_pid().to_string();
            return ProcessOutcome::failed(request, HolderError::Timeout { holder_pid });
        }
        let Some(issuer_pid) = request.issuer_pid.clone() else {
            return ProcessOutcome::failed(
                request,
                HolderError::InvalidRequest("requested without an issuer pid".into()),
            );
        };

        match self.client.request_status(&request, &issuer_pid).await {
            Ok(status) => match status.status {
                DcpRequestStatus::Issued => ProcessOutcome::transition(request, HolderRequestState::Issued, now),
                DcpRequestStatus::Rejected => ProcessOutcome::failed(
                    request,
                    HolderError::IssuerRejected(format!("issuer process '{issuer_pid}' was rejected")),
                ),
                DcpRequestStatus::Received => ProcessOutcome::pending(request, self.poll_interval),
            },
            Err(e) => ProcessOutcome::failed(request, e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::Utc;
    use quill_core::dcp::{CredentialRequestResponse, CredentialRequestStatus};
    use quill_core::{ManualClock, NoopTransactionContext, StateMachineConfig};
    use quill_statemachine::{FixedWait, StateMachineRuntime};
    use quill_store::InMemoryStateEntityStore;

    /// Scripted issuer: pops one answer per call, repeating the last one.
    #[derive(Default)]
    pub(crate) struct ScriptedIssuer {
        pub(crate) send: Mutex<VecDeque<Result<String, HolderError>>>,
        pub(crate) status: Mutex<VecDeque<DcpRequestStatus>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IssuerClient for ScriptedIssuer {
        async fn request_credentials(
            &self,
            request: &HolderCredentialRequest,
        ) -> Result<CredentialRequestResponse, HolderError> {
            self.calls.lock().unwrap().push(format!("send {}", request.holder_pid()));
            let next = self.send.lock().unwrap().pop_front();
            match next {
                Some(Ok(issuer_pid)) => Ok(CredentialRequestResponse { issuer_pid }),
                Some(Err(e)) => Err(e),
                None => Ok(CredentialRequestResponse {
                    issuer_pid: "ipid-default".into(),
                }),
            }
        }

        async fn request_status(
            &self,
            request: &HolderCredentialRequest,
            issuer_pid: &str,
        ) -> Result<CredentialRequestStatus, HolderError> {
            self.calls.lock().unwrap().push(format!("status {issuer_pid}"));
            let mut queue = self.status.lock().unwrap();
            let status = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().copied().unwrap_or(DcpRequestStatus::Received)
            };
            Ok(CredentialRequestStatus {
                issuer_pid: issuer_pid.to_string(),
                holder_pid: request.holder_pid().to_string(),
                status,
            })
        }
    }

    pub(crate) fn types() -> BTreeMap<String, CredentialFormat> {
        BTreeMap::from([("MembershipCredential".to_string(), CredentialFormat::Vc1Jwt)])
    }

    struct World {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryStateEntityStore<HolderCredentialRequest>>,
        manager: CredentialRequestManager,
        runtime: StateMachineRuntime<HolderCredentialRequest>,
    }

    fn world(issuer: Arc<ScriptedIssuer>, retry_limit: u32) -> World {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryStateEntityStore::<HolderCredentialRequest>::new(clock.clone()));
        let manager = CredentialRequestManager::new(store.clone(), Arc::new(NoopTransactionContext), clock.clone());
        let config = StateMachineConfig {
            retry_limit,
            ..StateMachineConfig::default()
        };
        let runtime = StateMachineRuntime::<HolderCredentialRequest>::builder("holder", store.clone())
            .handler(Arc::new(RequestCredentialsHandler::new(issuer.clone())))
            .handler(Arc::new(RequestStatusHandler::new(issuer, Duration::from_secs(5))))
            .config(config)
            .wait_strategy(Arc::new(FixedWait(Duration::ZERO)))
            .clock(clock.clone())
            .build()
            .unwrap();
        World {
            clock,
            store,
            manager,
            runtime,
        }
    }

    #[test]
    fn test_initiate_is_idempotent() {
        let w = world(Arc::new(ScriptedIssuer::default()), 3);
        let first = w.manager.initiate_request("holder", "hpid-1", "did:web:issuer", types()).unwrap();
        let again = w.manager.initiate_request("holder", "hpid-1", "did:web:issuer", types()).unwrap();
        assert_eq!(first.meta.created_at, again.meta.created_at);
        assert_eq!(w.store.query(&quill_core::QuerySpec::all()).unwrap().len(), 1);

        assert!(matches!(
            w.manager.initiate_request("other", "hpid-1", "did:web:issuer", types()),
            Err(HolderError::InvalidRequest(_))
        ));
        assert!(matches!(
            w.manager.initiate_request("holder", "hpid-2", "did:web:issuer", BTreeMap::new()),
            Err(HolderError::Core(_))
        ));
    }

    #[tokio::test]
    async fn test_request_reaches_issued() {
        let issuer = Arc::new(ScriptedIssuer::default());
        issuer.send.lock().unwrap().push_back(Ok("ipid-1".into()));
        issuer
            .status
            .lock()
            .unwrap()
            .extend([DcpRequestStatus::Received, DcpRequestStatus::Issued]);
        let w = world(issuer.clone(), 3);
        w.manager.initiate_request("holder", "hpid-1", "did:web:issuer", types()).unwrap();

        let report = w.runtime.tick().await;
        assert_eq!(report.transitioned, 1);
        assert_eq!(report.pending, 1);
        let request = w.manager.find("hpid-1").unwrap().unwrap();
        assert_eq!(request.state(), HolderRequestState::Requested);
        assert_eq!(request.issuer_pid.as_deref(), Some("ipid-1"));

        // Held for the poll interval.
        assert!(w.runtime.tick().await.is_idle());
        w.clock.advance(chrono::Duration::seconds(5));
        w.runtime.tick().await;
        assert_eq!(w.manager.find("hpid-1").unwrap().unwrap().state(), HolderRequestState::Issued);
        assert_eq!(
            *issuer.calls.lock().unwrap(),
            vec!["send hpid-1", "status ipid-1", "status ipid-1"]
        );
    }

    #[tokio::test]
    async fn test_issuer_outage_exhausts_retries() {
        let issuer = Arc::new(ScriptedIssuer::default());
        for _ in 0..3 {
            issuer
                .send
                .lock()
                .unwrap()
                .push_back(Err(HolderError::Issuer("connection refused".into())));
        }
        let w = world(issuer, 2);
        w.manager.initiate_request("holder", "hpid-1", "did:web:issuer", types()).unwrap();

        for _ in 0..3 {
            w.runtime.tick().await;
        }
        let request = w.manager.find("hpid-1").unwrap().unwrap();
        assert_eq!(request.state(), HolderRequestState::Error);
        assert!(request
            .meta
            .error_detail
            .as_deref()
            .unwrap()
            .starts_with("retry limit of 2 exceeded"));
        assert!(w.runtime.tick().await.is_idle());
    }

    #[tokio::test]
    async fn test_rejection_is_final() {
        let issuer = Arc::new(ScriptedIssuer::default());
        issuer.status.lock().unwrap().push_back(DcpRequestStatus::Rejected);
        let w = world(issuer, 3);
        w.manager.initiate_request("holder", "hpid-1", "did:web:issuer", types()).unwrap();

        let report = w.runtime.tick().await;
        assert_eq!(report.escalated, 1);
        let request = w.manager.find("hpid-1").unwrap().unwrap();
        assert_eq!(request.state(), HolderRequestState::Error);
        assert!(request.meta.error_detail.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_requested_times_out() {
        let issuer = Arc::new(ScriptedIssuer::default());
        let w = world(issuer, 3);
        w.manager.initiate_request("holder", "hpid-1", "did:web:issuer", types()).unwrap();
        w.runtime.tick().await;
        assert_eq!(w.manager.find("hpid-1").unwrap().unwrap().state(), HolderRequestState::Requested);

        w.clock.advance(chrono::Duration::hours(2));
        let report = w.runtime.tick().await;
        assert_eq!(report.escalated, 1);
        let request = w.manager.find("hpid-1").unwrap().unwrap();
        assert_eq!(request.state(), HolderRequestState::Error);
        assert!(request.meta.error_detail.unwrap().contains("timed out"));
    }
}
