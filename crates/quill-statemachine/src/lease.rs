use std::sync::Arc;
use std::time::Duration;

use quill_core::config::to_chrono;
use quill_core::{CoreError, EntityState, LeaseParams, StatefulEntity};
use quill_store::{LeaseAction, LeaseResult, StateEntityStore};

/// Applies an event-driven change to a single entity under its lease.
///
/// Used when something other than the runtime (an inbound delivery, an API
/// call) needs to move an entity. A live lease held by anyone yields
/// `CoreError::Conflict`, which callers may retry.
pub struct LeasedUpdate<E: StatefulEntity> {
    store: Arc<dyn StateEntityStore<E>>,
    params: LeaseParams,
}

impl<E: StatefulEntity> LeasedUpdate<E> {
    pub fn new(store: Arc<dyn StateEntityStore<E>>, leaser_id: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            store,
            params: LeaseParams::new(leaser_id, to_chrono(lease_duration)),
        }
    }

    /// Lease `id`, run `mutate` on it, then save and release. On a failed
    /// mutation the stored entity is left untouched and the lease released.
    pub fn apply<T>(&self, id: &str, mutate: impl FnOnce(&mut E) -> Result<T, CoreError>) -> Result<(E, T), CoreError> {
        let original = match self.store.lease_by_id(id, &self.params)? {
            LeaseResult::Acquired(entity) => entity,
            LeaseResult::AlreadyLeased => {
                tracing::debug!(entity_id = %id, "entity busy, update deferred");
                return Err(CoreError::Conflict(format!(
                    "{} '{id}' is leased by another worker",
                    <E::State as EntityState>::KIND
                )));
            }
            LeaseResult::NotFound => {
                return Err(CoreError::NotFound(format!(
                    "{} '{id}'",
                    <E::State as EntityState>::KIND
                )))
            }
        };

        let mut entity = original.clone();
        match mutate(&mut entity) {
            Ok(value) => {
                self.store.save(&entity, &self.params.leaser_id, LeaseAction::Release)?;
                Ok((entity, value))
            }
            Err(err) => {
                self.store.save(&original, &self.params.leaser_id, LeaseAction::Release)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quill_core::{Clock, IssuanceProcess, IssuanceProcessState, ManualClock};
    use quill_store::InMemoryStateEntityStore;

    fn setup() -> (Arc<ManualClock>, Arc<InMemoryStateEntityStore<IssuanceProcess>>, String) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryStateEntityStore::new(clock.clone()));
        let p = IssuanceProcess::new("issuer", "holder", "hpid", clock.now());
        let id = p.id().to_string();
        store.create(p).unwrap();
        (clock, store, id)
    }

    #[test]
    fn test_apply_saves_and_releases() {
        let (clock, store, id) = setup();
        let update = LeasedUpdate::new(store.clone() as Arc<dyn StateEntityStore<IssuanceProcess>>, "api", Duration::from_secs(10));
        let (entity, ()) = update
            .apply(&id, |p| p.meta.transition_to(IssuanceProcessState::Approved, clock.now()))
            .unwrap();
        assert_eq!(entity.state(), IssuanceProcessState::Approved);
        assert_eq!(store.find_by_id(&id).unwrap().unwrap().state(), IssuanceProcessState::Approved);
        assert!(store.lease_of(&id).unwrap().is_none());
    }

    #[test]
    fn test_busy_entity_is_conflict() {
        let (_, store, id) = setup();
        store
            .lease_by_id(&id, &LeaseParams::new("runtime", chrono::Duration::seconds(60)))
            .unwrap();
        let update = LeasedUpdate::new(store.clone() as Arc<dyn StateEntityStore<IssuanceProcess>>, "api", Duration::from_secs(10));
        let err = update.apply(&id, |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failed_mutation_leaves_entity_untouched() {
        let (clock, store, id) = setup();
        let update = LeasedUpdate::new(store.clone() as Arc<dyn StateEntityStore<IssuanceProcess>>, "api", Duration::from_secs(10));
        let err = update
            .apply(&id, |p| {
                p.holder_id = "changed".into();
                p.meta.transition_to(IssuanceProcessState::Delivered, clock.now())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        let stored = store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.holder_id, "holder");
        assert!(store.lease_of(&id).unwrap().is_none());
    }

    #[test]
    fn test_missing_entity() {
        let (_, store, _) = setup();
        let update = LeasedUpdate::new(store as Arc<dyn StateEntityStore<IssuanceProcess>>, "api", Duration::from_secs(10));
        assert!(matches!(update.apply("nope", |_| Ok(())), Err(CoreError::NotFound(_))));
    }
}
