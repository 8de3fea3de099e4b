use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::config::to_chrono;
use quill_core::{Clock, CoreError, StatefulEntity};
use quill_store::{LeaseAction, StateEntityStore};

/// Result of processing one leased entity.
#[derive(Debug)]
pub enum ProcessOutcome<E> {
    /// The entity moved to a new state. Persisted and released.
    Transitioned(E),
    /// Nothing to do yet. Persisted, and hidden from pollers for
    /// `recheck_after` when given.
    Pending { entity: E, recheck_after: Option<Duration> },
    /// The attempt failed. Retried or escalated depending on the error.
    Failed { entity: E, error: CoreError },
}

impl<E: StatefulEntity> ProcessOutcome<E> {
    /// Transition `entity` to `next`; an illegal transition becomes a failure.
    pub fn transition(mut entity: E, next: E::State, now: DateTime<Utc>) -> Self {
        match entity.meta_mut().transition_to(next, now) {
            Ok(()) => Self::Transitioned(entity),
            Err(error) => Self::Failed { entity, error },
        }
    }

    pub fn pending(entity: E, recheck_after: Duration) -> Self {
        Self::Pending {
            entity,
            recheck_after: Some(recheck_after),
        }
    }

    pub fn failed(entity: E, error: impl Into<CoreError>) -> Self {
        Self::Failed {
            entity,
            error: error.into(),
        }
    }

    pub fn entity(&self) -> &E {
        match self {
            Self::Transitioned(e) => e,
            Self::Pending { entity, .. } | Self::Failed { entity, .. } => entity,
        }
    }
}

/// What a handler can reach while it holds an entity's lease.
pub struct ProcessContext<E: StatefulEntity> {
    store: Arc<dyn StateEntityStore<E>>,
    clock: Arc<dyn Clock>,
    leaser_id: String,
    lease_duration: Duration,
}

impl<E: StatefulEntity> Clone for ProcessContext<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            leaser_id: self.leaser_id.clone(),
            lease_duration: self.lease_duration,
        }
    }
}

impl<E: StatefulEntity> ProcessContext<E> {
    pub fn new(
        store: Arc<dyn StateEntityStore<E>>,
        clock: Arc<dyn Clock>,
        leaser_id: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            leaser_id: leaser_id.into(),
            lease_duration,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn leaser_id(&self) -> &str {
        &self.leaser_id
    }

    /// Persist an intermediate state without giving up the lease.
    pub fn checkpoint(&self, entity: &E) -> Result<(), CoreError> {
        let hold = self.clock.now() + to_chrono(self.lease_duration);
        self.store
            .save(entity, &self.leaser_id, LeaseAction::HoldUntil(hold))
            .map_err(CoreError::from)
    }
}

/// Processes entities in a fixed set of states.
#[async_trait]
pub trait EntityHandler<E: StatefulEntity>: Send + Sync {
    fn name(&self) -> &'static str;

    fn states(&self) -> Vec<E::State>;

    async fn handle(&self, entity: E, ctx: &ProcessContext<E>) -> ProcessOutcome<E>;
}
