//! Integration test: scope-limited presentation queries over issued credentials.

use chrono::Duration;
use quill_holder::{PresentationQuery, QueryResult};
use quill_integration_tests::{World, HOLDER, MEMBERSHIP, MEMBERSHIP_SCOPE};

const PCF_SCOPE: &str = "org.eclipse.edc.vc.type:PcfCredential:read";

/// Run a full exchange and return the id of the issued credential.
async fn issue_membership(w: &World) -> String {
    w.request_membership("hpid-1");
    w.holder.tick().await;
    w.issuance.tick().await;
    w.poll_holder().await;
    let held = w.held_credentials();
    assert_eq!(held.len(), 1);
    held[0].credential().id.clone()
}

fn scopes() -> Vec<String> {
    vec![MEMBERSHIP_SCOPE.to_string()]
}

#[tokio::test]
async fn test_granted_scope_returns_credential() {
    let w = World::new().await;
    let credential_id = issue_membership(&w).await;

    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &scopes())
        .await;
    assert!(result.is_success(), "{result:?}");
    let credentials = result.credentials();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].credential.id, credential_id);
    assert!(credentials[0].credential.has_type(MEMBERSHIP));
}

#[tokio::test]
async fn test_query_outside_granted_scope_is_unauthorized() {
    let w = World::new().await;
    issue_membership(&w).await;

    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &[PCF_SCOPE.to_string()])
        .await;
    match result {
        QueryResult::Unauthorized(msg) => assert!(msg.contains("outside of scope")),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unmatched_scope_is_empty_success() {
    let w = World::new().await;
    issue_membership(&w).await;

    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([PCF_SCOPE]), &[PCF_SCOPE.to_string()])
        .await;
    assert!(result.is_success());
    assert!(result.credentials().is_empty());

    let other_participant = w
        .resolver
        .query("someone-else", &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &scopes())
        .await;
    assert!(other_participant.credentials().is_empty());
}

#[tokio::test]
async fn test_expired_credentials_are_excluded() {
    let w = World::new().await;
    issue_membership(&w).await;

    w.clock.advance(Duration::hours(2));
    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &scopes())
        .await;
    assert!(result.is_success());
    assert!(result.credentials().is_empty());
}

#[tokio::test]
async fn test_revoked_credentials_are_excluded() {
    let w = World::new().await;
    let credential_id = issue_membership(&w).await;

    w.status_lists.revoke(&credential_id).unwrap();
    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &scopes())
        .await;
    assert!(result.is_success());
    assert!(result.credentials().is_empty());

    // Revocation is final.
    assert!(w.status_lists.resume(&credential_id).is_err());
}

#[tokio::test]
async fn test_suspension_hides_until_resumed() {
    let w = World::new().await;
    let credential_id = issue_membership(&w).await;

    w.status_lists.suspend(&credential_id).unwrap();
    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &scopes())
        .await;
    assert!(result.credentials().is_empty());

    w.status_lists.resume(&credential_id).unwrap();
    let result = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped([MEMBERSHIP_SCOPE]), &scopes())
        .await;
    assert_eq!(result.credentials().len(), 1);
}

#[tokio::test]
async fn test_malformed_queries() {
    let w = World::new().await;

    let empty = w.resolver.query(HOLDER, &PresentationQuery::default(), &scopes()).await;
    assert!(matches!(empty, QueryResult::NoScopeFound(_)));

    let invalid = w
        .resolver
        .query(HOLDER, &PresentationQuery::scoped(["not-a-scope"]), &scopes())
        .await;
    assert!(matches!(invalid, QueryResult::InvalidScope(ref errors) if errors.len() == 1));

    let definition = PresentationQuery {
        scopes: scopes(),
        presentation_definition: Some(serde_json::json!({"id": "pd-1"})),
    };
    let unsupported = w.resolver.query(HOLDER, &definition, &scopes()).await;
    assert!(matches!(unsupported, QueryResult::Unsupported(_)));
}
