use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use quill_core::config::to_chrono;
use quill_core::{
    in_transaction, Clock, Criterion, CriterionOperator, EngineEvent, EventBus, QuerySpec, TransactionContext, VcStatus,
    VerifiableCredentialResource,
};
use quill_store::Repository;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::HolderError;
use crate::request::CredentialRequestManager;
use crate::revocation::{RevocationService, RevocationStatus};

/// Works out the state a stored credential should be in right now.
pub struct CredentialStatusCheck {
    revocation: Arc<dyn RevocationService>,
    clock: Arc<dyn Clock>,
}

impl CredentialStatusCheck {
    pub fn new(revocation: Arc<dyn RevocationService>, clock: Arc<dyn Clock>) -> Self {
        Self { revocation, clock }
    }

    /// Revoked, then suspended, then expired, then not yet valid. A failed
    /// status list lookup yields ERROR.
    pub async fn check_status(&self, resource: &VerifiableCredentialResource) -> VcStatus {
        let credential = resource.credential();
        if !credential.credential_status.is_empty() {
            match self.revocation.check(credential).await {
                Ok(RevocationStatus::Revoked) => return VcStatus::Revoked,
                Ok(RevocationStatus::Suspended) => return VcStatus::Suspended,
                Ok(RevocationStatus::Valid) => {}
                Err(e) => {
                    tracing::warn!(credential_id = %resource.id, error = %e, "status check failed");
                    return VcStatus::Error;
                }
            }
        }
        let now = self.clock.now();
        if credential.is_expired(now) {
            VcStatus::Expired
        } else if credential.is_not_yet_valid(now) {
            VcStatus::NotYetValid
        } else {
            VcStatus::Issued
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogReport {
    pub checked: usize,
    pub changed: usize,
    pub reissued: usize,
    /// Credentials whose update failed; retried on the next pass.
    pub failed: usize,
}

/// Periodically re-evaluates stored credentials and asks for fresh ones
/// before the current ones run out.
pub struct CredentialWatchdog {
    credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
    status_check: CredentialStatusCheck,
    events: EventBus,
    tx: Arc<dyn TransactionContext>,
    clock: Arc<dyn Clock>,
    reissue: Option<(Arc<CredentialRequestManager>, Duration)>,
}

impl CredentialWatchdog {
    pub fn new(
        credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
        status_check: CredentialStatusCheck,
        events: EventBus,
        tx: Arc<dyn TransactionContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            status_check,
            events,
            tx,
            clock,
            reissue: None,
        }
    }

    /// Request a replacement once a credential is within `grace` of expiring.
    pub fn with_reissuance(mut self, manager: Arc<CredentialRequestManager>, grace: Duration) -> Self {
        self.reissue = Some((manager, grace));
        self
    }

    fn watched(&self) -> Result<Vec<VerifiableCredentialResource>, HolderError> {
        let states = [VcStatus::Issued, VcStatus::NotYetValid, VcStatus::Suspended];
        let names: Vec<&str> = states.iter().map(VcStatus::as_str).collect();
        Ok(self
            .credentials
            .query(&QuerySpec::new(vec![Criterion::new("state", CriterionOperator::In, json!(names))]))?)
    }

    fn start_reissue(&self, resource: &mut VerifiableCredentialResource) -> Result<bool, HolderError> {
        let Some((manager, grace)) = &self.reissue else {
            return Ok(false);
        };
        if resource.reissue_request_id.is_some() || !matches!(resource.state, VcStatus::Issued | VcStatus::Expired) {
            return Ok(false);
        }
        let credential = resource.credential();
        let Some(expiration) = credential.expiration_date else {
            return Ok(false);
        };
        if self.clock.now() < expiration - to_chrono(*grace) {
            return Ok(false);
        }
        let Some(credential_type) = credential.primary_type() else {
            tracing::warn!(credential_id = %resource.id, "credential has no specific type, not reissuing");
            return Ok(false);
        };

        let types = BTreeMap::from([(credential_type.to_string(), resource.verifiable_credential.format)]);
        let holder_pid = uuid::Uuid::now_v7().to_string();
        manager.initiate_request(&resource.participant_context_id, &holder_pid, &resource.issuer_id, types)?;
        tracing::info!(
            credential_id = %resource.id,
            holder_pid = %holder_pid,
            expires = %expiration,
            "reissuance requested"
        );
        resource.reissue_request_id = Some(holder_pid);
        Ok(true)
    }

    /// One pass over every watched credential. A credential that cannot be
    /// updated is counted in `failed` and does not stop the pass.
    pub async fn run_once(&self) -> Result<WatchdogReport, HolderError> {
        let mut report = WatchdogReport::default();
        for resource in self.watched()? {
            report.checked += 1;
            let next = self.status_check.check_status(&resource).await;
            match self.apply(&resource, next) {
                Ok((changed, reissued)) => {
                    report.changed += usize::from(changed);
                    report.reissued += usize::from(reissued);
                }
                Err(e) => {
                    tracing::warn!(credential_id = %resource.id, error = %e, "credential update failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Re-read and update one credential in a transaction. Returns whether
    /// its state changed and whether a reissuance was started.
    fn apply(&self, checked: &VerifiableCredentialResource, next: VcStatus) -> Result<(bool, bool), HolderError> {
        let now = self.clock.now();
        let (changed, reissued) = in_transaction(self.tx.as_ref(), || {
            let Some(mut resource) = self.credentials.find_by_id(&checked.id)? else {
                return Ok((false, false));
            };
            // Moved on since it was checked; the next pass sees the new state.
            if resource.state != checked.state {
                return Ok((false, false));
            }
            let changed = next != resource.state;
            if changed {
                resource.state = next;
                resource.timestamp = now;
            }
            let reissued = match self.start_reissue(&mut resource) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(credential_id = %resource.id, error = %e, "reissuance failed");
                    false
                }
            };
            if changed || reissued {
                self.credentials.update(resource)?;
            }
            Ok((changed, reissued))
        })?;

        if changed {
            tracing::info!(credential_id = %checked.id, from = %checked.state, to = %next, "credential state changed");
            self.events.publish(EngineEvent::CredentialStatusChanged {
                credential_id: checked.id.clone(),
                status: next,
            });
        }
        Ok((changed, reissued))
    }

    /// Run every `period` until `shutdown` flips.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => match self.run_once().await {
                        Ok(report) if report.changed > 0 || report.reissued > 0 => {
                            tracing::debug!(?report, "watchdog pass complete");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "watchdog pass failed"),
                    },
                }
            }
            tracing::debug!("credential watchdog stopped");
        })
    }
}
