use std::sync::Arc;

use quill_core::{EngineEvent, EventBus, HolderCredentialRequest};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::HolderError;
use crate::request::CredentialRequestManager;

/// Turns credential offers into holder credential requests. The offer id
/// doubles as the holder pid, so a redelivered offer maps onto the request
/// it already created.
pub struct OfferListener {
    manager: Arc<CredentialRequestManager>,
}

impl OfferListener {
    pub fn new(manager: Arc<CredentialRequestManager>) -> Self {
        Self { manager }
    }

    pub fn handle(&self, event: &EngineEvent) -> Result<Option<HolderCredentialRequest>, HolderError> {
        let EngineEvent::CredentialOfferReceived {
            offer_id,
            participant_context_id,
            issuer_did,
            credentials,
        } = event
        else {
            return Ok(None);
        };
        tracing::info!(offer_id = %offer_id, issuer = %issuer_did, "credential offer received");
        let request = self
            .manager
            .initiate_request(participant_context_id, offer_id, issuer_did, credentials.clone())?;
        Ok(Some(request))
    }

    /// Consume offers from `events` until `shutdown` flips.
    pub fn spawn(self: Arc<Self>, events: &EventBus, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if let Err(e) = self.handle(&event) {
                                tracing::warn!(error = %e, "credential offer not accepted");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "offer listener lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("offer listener stopped");
        })
    }
}
