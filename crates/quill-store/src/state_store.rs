use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use quill_core::{Clock, EntityState, Lease, LeaseParams, QuerySpec, StatefulEntity, SystemClock};

use crate::error::StoreError;
use crate::lease::{LeaseAction, LeaseResult};

/// Store for entities driven by the state-machine runtime.
///
/// Every lease acquisition is a conditional update on a single entity: an
/// entity is handed to at most one leaser while its lease is live.
pub trait StateEntityStore<E: StatefulEntity>: Send + Sync {
    fn create(&self, entity: E) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError>;

    /// Lease up to `max_batch` unleased entities in one of `states`, oldest
    /// state timestamp first.
    fn next_not_leased(
        &self,
        max_batch: usize,
        states: &[E::State],
        params: &LeaseParams,
    ) -> Result<Vec<E>, StoreError>;

    fn lease_by_id(&self, id: &str, params: &LeaseParams) -> Result<LeaseResult<E>, StoreError>;

    /// Persist `entity`. Rejected when another leaser holds a live lease.
    fn save(&self, entity: &E, leaser_id: &str, action: LeaseAction) -> Result<(), StoreError>;

    /// Drop any lease on the entity regardless of holder.
    fn break_lease(&self, id: &str) -> Result<(), StoreError>;

    fn lease_of(&self, id: &str) -> Result<Option<Lease>, StoreError>;

    fn query(&self, spec: &QuerySpec) -> Result<Vec<E>, StoreError>;
}

struct Record<E> {
    entity: E,
    lease: Option<Lease>,
}

/// DashMap-backed `StateEntityStore`.
pub struct InMemoryStateEntityStore<E: StatefulEntity> {
    records: DashMap<String, Record<E>>,
    clock: Arc<dyn Clock>,
}

impl<E: StatefulEntity> InMemoryStateEntityStore<E> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn not_found(id: &str) -> StoreError {
        StoreError::NotFound {
            kind: <E::State as EntityState>::KIND,
            id: id.to_string(),
        }
    }

    fn already_leased(id: &str) -> StoreError {
        StoreError::AlreadyLeased {
            kind: <E::State as EntityState>::KIND,
            id: id.to_string(),
        }
    }
}

impl<E: StatefulEntity> Default for InMemoryStateEntityStore<E> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl<E: StatefulEntity> StateEntityStore<E> for InMemoryStateEntityStore<E> {
    fn create(&self, entity: E) -> Result<(), StoreError> {
        let id = entity.id().to_string();
        match self.records.entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: <E::State as EntityState>::KIND,
                id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Record { entity, lease: None });
                tracing::debug!(kind = <E::State as EntityState>::KIND, entity_id = %id, "entity created");
                Ok(())
            }
        }
    }

    fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError> {
        Ok(self.records.get(id).map(|r| r.entity.clone()))
    }

    fn next_not_leased(
        &self,
        max_batch: usize,
        states: &[E::State],
        params: &LeaseParams,
    ) -> Result<Vec<E>, StoreError> {
        if max_batch == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();

        let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, String)> = self
            .records
            .iter()
            .filter(|r| states.contains(&r.entity.state()))
            .filter(|r| r.lease.as_ref().map_or(true, |l| l.is_expired(now)))
            .map(|r| (r.entity.meta().state_timestamp(), r.key().clone()))
            .collect();
        candidates.sort();

        let mut leased = Vec::with_capacity(max_batch.min(candidates.len()));
        for (_, id) in candidates {
            if leased.len() >= max_batch {
                break;
            }
            // Re-check under the entry lock; another leaser may have won the race.
            let Some(mut record) = self.records.get_mut(&id) else {
                continue;
            };
            let free = record.lease.as_ref().map_or(true, |l| l.is_expired(now));
            if !free || !states.contains(&record.entity.state()) {
                continue;
            }
            record.lease = Some(params.lease_for(&id, now));
            leased.push(record.entity.clone());
        }
        Ok(leased)
    }

    fn lease_by_id(&self, id: &str, params: &LeaseParams) -> Result<LeaseResult<E>, StoreError> {
        let now = self.clock.now();
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(LeaseResult::NotFound);
        };
        if record.lease.as_ref().is_some_and(|l| !l.is_expired(now)) {
            return Ok(LeaseResult::AlreadyLeased);
        }
        record.lease = Some(params.lease_for(id, now));
        Ok(LeaseResult::Acquired(record.entity.clone()))
    }

    fn save(&self, entity: &E, leaser_id: &str, action: LeaseAction) -> Result<(), StoreError> {
        let now = self.clock.now();
        let id = entity.id();
        let mut record = self.records.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if record.lease.as_ref().is_some_and(|l| l.blocks(leaser_id, now)) {
            return Err(Self::already_leased(id));
        }
        record.entity = entity.clone();
        record.lease = match action {
            LeaseAction::Release => None,
            LeaseAction::HoldUntil(expiry) => Some(Lease::new(id, leaser_id, expiry)),
        };
        Ok(())
    }

    fn break_lease(&self, id: &str) -> Result<(), StoreError> {
        let mut record = self.records.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if let Some(lease) = record.lease.take() {
            tracing::warn!(entity_id = %id, leaser_id = %lease.leaser_id, "lease broken");
        }
        Ok(())
    }

    fn lease_of(&self, id: &str) -> Result<Option<Lease>, StoreError> {
        let record = self.records.get(id).ok_or_else(|| Self::not_found(id))?;
        Ok(record.lease.clone())
    }

    fn query(&self, spec: &QuerySpec) -> Result<Vec<E>, StoreError> {
        let mut matched = Vec::new();
        for record in self.records.iter() {
            let json = serde_json::to_value(&record.entity).map_err(|e| StoreError::Backend(e.to_string()))?;
            if spec.matches(&json) {
                matched.push(record.entity.clone());
            }
        }
        matched.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(spec.page(matched))
    }
}
