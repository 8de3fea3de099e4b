//! Integration test: issuer and holder exchanging a credential over DCP.

use quill_core::{
    Claims, Clock, EngineEvent, HolderRequestState, IssuanceProcessState, RuleDefinition, StatefulEntity, VcStatus,
};
use quill_holder::receiver::RECEIVER_LEASER_ID;
use quill_integration_tests::{World, HOLDER, HOLDER_RECORD, ISSUER_DID, MEMBERSHIP, POLL_INTERVAL};
use quill_issuance::RuleEngine;
use quill_store::{Repository, StateEntityStore};
use serde_json::json;

#[tokio::test]
async fn test_full_exchange_reaches_issued() {
    let w = World::new().await;
    let mut events = w.events.subscribe();
    w.request_membership("hpid-1");

    // CREATED -> REQUESTING -> REQUESTED, then the first status poll is held
    w.holder.tick().await;
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Requested);
    let issuer_pid = request.issuer_pid.clone().expect("issuer pid recorded");
    let process = w.processes.find_by_id(&issuer_pid).unwrap().unwrap();
    assert_eq!(process.state(), IssuanceProcessState::Submitted);
    assert_eq!(process.holder_pid, "hpid-1");

    // SUBMITTED -> APPROVED -> DELIVERED, delivering into the holder store
    let report = w.issuance.tick().await;
    assert_eq!(report.transitioned, 2);
    let process = w.processes.find_by_id(&issuer_pid).unwrap().unwrap();
    assert_eq!(process.state(), IssuanceProcessState::Delivered);

    let held = w.held_credentials();
    assert_eq!(held.len(), 1);
    let stored = &held[0];
    assert_eq!(stored.participant_context_id, HOLDER);
    assert_eq!(stored.state, VcStatus::Issued);
    assert_eq!(stored.issuer_id, ISSUER_DID);
    let credential = stored.credential();
    assert!(credential.has_type(MEMBERSHIP));
    assert_eq!(credential.credential_subject[0].claims["level"], "gold");
    assert_eq!(credential.credential_status.len(), 1);

    let record = w.issued.find_by_id(&credential.id).unwrap().unwrap();
    assert_eq!(record.holder_id, HOLDER_RECORD);

    match events.try_recv().unwrap() {
        EngineEvent::CredentialsStored {
            participant_context_id,
            holder_pid,
            credential_ids,
        } => {
            assert_eq!(participant_context_id, HOLDER);
            assert_eq!(holder_pid.as_deref(), Some("hpid-1"));
            assert_eq!(credential_ids, vec![stored.id.clone()]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    w.poll_holder().await;
    assert_eq!(w.request("hpid-1").state(), HolderRequestState::Issued);
    assert!(w.holder.tick().await.is_idle());
}

#[tokio::test]
async fn test_delivery_during_in_flight_status_poll() {
    let w = World::new().await;
    w.request_membership("hpid-1");
    w.holder.tick().await;
    let issuer_pid = w.request("hpid-1").issuer_pid.unwrap();

    // The poll reads RECEIVED, then stalls while holding the request lease.
    w.clock.advance(chrono::Duration::seconds(POLL_INTERVAL.as_secs() as i64 + 1));
    let pause = w.issuer_client.pause_next_status();
    let deliver = async {
        pause.reached.notified().await;
        let lease = w.requests.lease_of("hpid-1").unwrap().expect("poll holds the lease");
        assert!(lease.expiry > w.clock.now());
        assert_ne!(lease.leaser_id, RECEIVER_LEASER_ID);

        w.issuance.tick().await;
        assert_eq!(
            w.processes.find_by_id(&issuer_pid).unwrap().unwrap().state(),
            IssuanceProcessState::Delivered
        );
        assert_eq!(w.held_credentials().len(), 1);
        assert_eq!(w.request("hpid-1").state(), HolderRequestState::Requested);
        pause.release.notify_one();
    };
    let (report, ()) = tokio::join!(w.holder.tick(), deliver);
    assert_eq!(report.pending, 1);

    // The stale answer leaves the request waiting; the next poll completes it.
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Requested);
    assert!(request.meta.error_detail.is_none());

    w.poll_holder().await;
    assert_eq!(w.request("hpid-1").state(), HolderRequestState::Issued);
    assert_eq!(w.held_credentials().len(), 1);
}

#[tokio::test]
async fn test_rule_rejection_reaches_holder() {
    let w = World::new().await;
    let mut holder = w.holders.find_by_id(HOLDER_RECORD).unwrap().unwrap();
    holder.properties.insert("level".into(), json!("silver"));
    w.holders.update(holder).unwrap();

    w.request_membership("hpid-1");
    w.holder.tick().await;
    let issuer_pid = w.request("hpid-1").issuer_pid.unwrap();

    let report = w.issuance.tick().await;
    assert_eq!(report.escalated, 1);
    let process = w.processes.find_by_id(&issuer_pid).unwrap().unwrap();
    assert_eq!(process.state(), IssuanceProcessState::Errored);
    assert!(process.meta.error_detail.as_deref().unwrap().contains("level"));

    w.poll_holder().await;
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Error);
    assert!(request.meta.error_detail.is_some());
    assert!(w.held_credentials().is_empty());
}

#[tokio::test]
async fn test_delivery_outage_is_retried() {
    let w = World::new().await;
    w.request_membership("hpid-1");
    w.holder.tick().await;
    let issuer_pid = w.request("hpid-1").issuer_pid.unwrap();

    w.storage.set_offline(true);
    let report = w.issuance.tick().await;
    assert_eq!(report.retried, 1);
    assert_eq!(
        w.processes.find_by_id(&issuer_pid).unwrap().unwrap().state(),
        IssuanceProcessState::Approved
    );
    assert!(w.held_credentials().is_empty());

    w.storage.set_offline(false);
    w.issuance.tick().await;
    assert_eq!(
        w.processes.find_by_id(&issuer_pid).unwrap().unwrap().state(),
        IssuanceProcessState::Delivered
    );
    assert_eq!(w.held_credentials().len(), 1);

    w.poll_holder().await;
    assert_eq!(w.request("hpid-1").state(), HolderRequestState::Issued);
}

#[test]
fn test_rule_evaluation_is_deterministic() {
    let rules = vec![
        RuleDefinition::expression("level", "EQ", "gold"),
        RuleDefinition::expression("age", "GEQ", 18),
        RuleDefinition::expression("country", "EQ", "DE"),
    ];
    let claims: Claims = json!({"level": "gold", "age": 17, "country": "FR"})
        .as_object()
        .cloned()
        .unwrap();

    let first = RuleEngine::default().evaluate(&rules, &claims).unwrap_err();
    assert!(first.to_string().contains("age"), "{first}");
    for _ in 0..50 {
        let engine = RuleEngine::default();
        assert_eq!(engine.evaluate(&rules, &claims).unwrap_err(), first);
    }
}
