//! Integration test: competing leasers never process the same entity.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use quill_core::{
    Clock, CredentialFormat, HolderCredentialRequest, HolderRequestState, LeaseParams, StatefulEntity, SystemClock,
};
use quill_statemachine::{EntityHandler, ProcessContext, ProcessOutcome, StateMachineRuntime};
use quill_store::{InMemoryStateEntityStore, StateEntityStore};

const ENTITIES: usize = 40;

fn seeded_store() -> Arc<InMemoryStateEntityStore<HolderCredentialRequest>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryStateEntityStore::<HolderCredentialRequest>::new(clock));
    let types = BTreeMap::from([("MembershipCredential".to_string(), CredentialFormat::Vc1Jwt)]);
    for i in 0..ENTITIES {
        let request =
            HolderCredentialRequest::new(format!("hpid-{i}"), "holder", "did:web:issuer", types.clone(), Utc::now())
                .unwrap();
        store.create(request).unwrap();
    }
    store
}

#[test]
fn test_concurrent_leasers_never_share_entities() {
    let store = seeded_store();
    let leased = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let store = store.clone();
            let leased = &leased;
            scope.spawn(move || {
                let params = LeaseParams::new(format!("leaser-{worker}"), chrono::Duration::minutes(5));
                loop {
                    let batch = store
                        .next_not_leased(3, &[HolderRequestState::Created], &params)
                        .unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    let mut leased = leased.lock().unwrap();
                    leased.extend(batch.into_iter().map(|r| r.id().to_string()));
                }
            });
        }
    });

    let leased = leased.into_inner().unwrap();
    let unique: HashSet<_> = leased.iter().collect();
    assert_eq!(leased.len(), ENTITIES);
    assert_eq!(unique.len(), ENTITIES);
}

/// Moves CREATED requests to REQUESTING and records who handled what.
struct RecordingHandler {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EntityHandler<HolderCredentialRequest> for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn states(&self) -> Vec<HolderRequestState> {
        vec![HolderRequestState::Created]
    }

    async fn handle(
        &self,
        request: HolderCredentialRequest,
        ctx: &ProcessContext<HolderCredentialRequest>,
    ) -> ProcessOutcome<HolderCredentialRequest> {
        tokio::task::yield_now().await;
        self.seen.lock().unwrap().push(request.id().to_string());
        ProcessOutcome::transition(request, HolderRequestState::Requesting, ctx.now())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_runtimes_process_each_entity_once() {
    let store = seeded_store();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let runtimes: Vec<_> = (0..3)
        .map(|i| {
            StateMachineRuntime::<HolderCredentialRequest>::builder("competing", store.clone())
                .leaser_id(format!("runtime-{i}"))
                .handler(Arc::new(RecordingHandler { seen: seen.clone() }))
                .build()
                .unwrap()
        })
        .collect();

    loop {
        let reports = tick_all(&runtimes).await;
        if reports.iter().all(|idle| *idle) {
            break;
        }
    }

    let seen = seen.lock().unwrap();
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), ENTITIES);
    assert_eq!(unique.len(), ENTITIES);
    for i in 0..ENTITIES {
        let request = store.find_by_id(&format!("hpid-{i}")).unwrap().unwrap();
        assert_eq!(request.state(), HolderRequestState::Requesting);
    }
}

/// Tick every runtime concurrently; true for each runtime that found no work.
async fn tick_all(runtimes: &[StateMachineRuntime<HolderCredentialRequest>]) -> Vec<bool> {
    let (a, b, c) = tokio::join!(runtimes[0].tick(), runtimes[1].tick(), runtimes[2].tick());
    vec![a.is_idle(), b.is_idle(), c.is_idle()]
}
