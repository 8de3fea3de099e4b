//! Integration test: holder credential requests driven by the runtime.

use std::collections::BTreeMap;

use quill_core::{CredentialFormat, HolderRequestState, IssuanceProcessState, StatefulEntity};
use quill_integration_tests::{World, HOLDER, ISSUER_DID, RETRY_LIMIT};
use quill_store::StateEntityStore;

#[tokio::test]
async fn test_request_walks_through_states() {
    let w = World::new().await;
    let created = w.request_membership("hpid-1");
    assert_eq!(created.state(), HolderRequestState::Created);
    assert!(created.issuer_pid.is_none());

    w.holder.tick().await;
    let requested = w.request("hpid-1");
    assert_eq!(requested.state(), HolderRequestState::Requested);
    assert!(requested.meta.state_timestamp() >= created.meta.state_timestamp());

    w.issuance.tick().await;
    w.poll_holder().await;
    let issued = w.request("hpid-1");
    assert_eq!(issued.state(), HolderRequestState::Issued);
    assert_eq!(issued.issuer_pid, requested.issuer_pid);
    assert!(issued.meta.error_detail.is_none());
}

#[tokio::test]
async fn test_unknown_credential_type_errors_with_detail() {
    let w = World::new().await;
    let types = BTreeMap::from([("UnknownCredential".to_string(), CredentialFormat::Vc1Jwt)]);
    w.manager.initiate_request(HOLDER, "hpid-1", ISSUER_DID, types).unwrap();

    let report = w.holder.tick().await;
    assert_eq!(report.escalated, 1);
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Error);
    let detail = request.meta.error_detail.as_deref().unwrap();
    assert!(detail.contains("UnknownCredential"), "{detail}");
    assert!(w.processes.is_empty());
}

#[tokio::test]
async fn test_issuer_outage_exhausts_retries() {
    let w = World::new().await;
    w.issuer_client.set_offline(true);
    w.request_membership("hpid-1");

    for _ in 0..=RETRY_LIMIT {
        w.holder.tick().await;
    }
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Error);
    let detail = request.meta.error_detail.as_deref().unwrap();
    assert!(detail.starts_with(&format!("retry limit of {RETRY_LIMIT} exceeded")), "{detail}");
    assert!(detail.contains("issuer unreachable"));

    // Final states are never leased again.
    assert!(w.holder.tick().await.is_idle());
}

#[tokio::test]
async fn test_issuer_outage_recovers() {
    let w = World::new().await;
    w.issuer_client.set_offline(true);
    w.request_membership("hpid-1");

    let report = w.holder.tick().await;
    assert_eq!(report.retried, 1);
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Requesting);
    assert!(request.meta.error_detail.is_some());

    w.issuer_client.set_offline(false);
    w.holder.tick().await;
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Requested);
    assert!(request.issuer_pid.is_some());
    assert_eq!(w.processes.len(), 1);
}

#[tokio::test]
async fn test_delivery_failure_exhausting_retries_errors_request() {
    let w = World::new().await;
    w.request_membership("hpid-1");
    w.holder.tick().await;
    let issuer_pid = w.request("hpid-1").issuer_pid.unwrap();

    w.storage.set_offline(true);
    for _ in 0..=RETRY_LIMIT {
        w.issuance.tick().await;
    }
    let process = w.processes.find_by_id(&issuer_pid).unwrap().unwrap();
    assert_eq!(process.state(), IssuanceProcessState::Errored);
    assert!(process.meta.error_detail.as_deref().unwrap().contains("unreachable"));

    w.poll_holder().await;
    let request = w.request("hpid-1");
    assert_eq!(request.state(), HolderRequestState::Error);
    assert!(request.meta.error_detail.is_some());
    assert!(w.held_credentials().is_empty());
}

#[tokio::test]
async fn test_initiate_is_idempotent_per_holder_pid() {
    let w = World::new().await;
    let first = w.request_membership("hpid-1");
    let again = w.request_membership("hpid-1");
    assert_eq!(first.id(), again.id());
    assert_eq!(w.requests.len(), 1);

    w.holder.tick().await;
    w.request_membership("hpid-1");
    assert_eq!(w.processes.len(), 1);
    assert!(w.requests.find_by_id(first.id()).unwrap().is_some());
}
