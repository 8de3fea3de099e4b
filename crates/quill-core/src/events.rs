use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::credential::{CredentialFormat, VcStatus};
use crate::holder::HolderRequestState;

/// Events published by the engines. Delivery is at-least-once, so
/// subscribers must be idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    CredentialOfferReceived {
        offer_id: String,
        participant_context_id: String,
        issuer_did: String,
        credentials: BTreeMap<String, CredentialFormat>,
    },
    HolderRequestTransitioned {
        holder_pid: String,
        state: HolderRequestState,
    },
    CredentialsStored {
        participant_context_id: String,
        holder_pid: Option<String>,
        credential_ids: Vec<String>,
    },
    CredentialStatusChanged {
        credential_id: String,
        status: VcStatus,
    },
}

/// In-process fan-out of `EngineEvent`s over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
