use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A state enum of a long-running workflow entity.
///
/// States carry a stable integer code for persistence, a transition table,
/// and a designated terminal error state used when retries are exhausted.
pub trait EntityState:
    Copy + Eq + std::hash::Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Human-readable name of the entity kind, used in logs and errors.
    const KIND: &'static str;

    fn code(&self) -> i32;

    fn from_code(code: i32) -> Result<Self, CoreError>;

    fn is_final(&self) -> bool;

    /// Whether the transition table permits moving from `self` to `next`.
    fn can_transition_to(&self, next: Self) -> bool;

    /// Terminal state entered when processing gives up.
    fn error_state() -> Self;
}

/// Bookkeeping shared by every stateful entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta<S> {
    pub id: String,
    state: S,
    state_timestamp: DateTime<Utc>,
    state_count: u32,
    #[serde(default)]
    pub trace_context: HashMap<String, String>,
    #[serde(default)]
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: EntityState> EntityMeta<S> {
    pub fn new(id: impl Into<String>, state: S, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state,
            state_timestamp: now,
            state_count: 0,
            trace_context: HashMap::new(),
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn state_code(&self) -> i32 {
        self.state.code()
    }

    pub fn state_timestamp(&self) -> DateTime<Utc> {
        self.state_timestamp
    }

    /// Failed attempts recorded since the last transition.
    pub fn state_count(&self) -> u32 {
        self.state_count
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    /// Move to `next`, resetting the attempt counter.
    pub fn transition_to(&mut self, next: S, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                kind: S::KIND,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(
            kind = S::KIND,
            entity_id = %self.id,
            from = %self.state,
            to = %next,
            "state transition"
        );
        self.state = next;
        self.state_count = 0;
        self.state_timestamp = now;
        self.updated_at = now;
        Ok(())
    }

    /// Force the entity into its kind's error state, keeping `detail`.
    pub fn escalate(&mut self, detail: impl Into<String>, now: DateTime<Utc>) -> Result<(), CoreError> {
        let detail = detail.into();
        self.transition_to(S::error_state(), now)?;
        tracing::warn!(kind = S::KIND, entity_id = %self.id, detail = %detail, "entity escalated to error state");
        self.error_detail = Some(detail);
        Ok(())
    }

    /// Record one failed attempt in the current state and return the new count.
    pub fn record_failure(&mut self, detail: impl Into<String>, now: DateTime<Utc>) -> u32 {
        self.state_count = self.state_count.saturating_add(1);
        self.error_detail = Some(detail.into());
        self.updated_at = now;
        self.state_count
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// An entity driven by the state-machine runtime.
pub trait StatefulEntity: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    type State: EntityState;

    fn meta(&self) -> &EntityMeta<Self::State>;

    fn meta_mut(&mut self) -> &mut EntityMeta<Self::State>;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn state(&self) -> Self::State {
        self.meta().state()
    }
}

/// Time-bounded exclusive claim on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub entity_id: String,
    pub leaser_id: String,
    pub expiry: DateTime<Utc>,
}

impl Lease {
    pub fn new(entity_id: impl Into<String>, leaser_id: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            leaser_id: leaser_id.into(),
            expiry,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn is_held_by(&self, leaser_id: &str) -> bool {
        self.leaser_id == leaser_id
    }

    /// A lease blocks `leaser_id` only while it is live and owned by someone else.
    pub fn blocks(&self, leaser_id: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_held_by(leaser_id)
    }
}

/// Who is leasing, and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseParams {
    pub leaser_id: String,
    pub duration: Duration,
}

impl LeaseParams {
    pub fn new(leaser_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            leaser_id: leaser_id.into(),
            duration,
        }
    }

    pub fn lease_for(&self, entity_id: &str, now: DateTime<Utc>) -> Lease {
        Lease::new(entity_id, self.leaser_id.clone(), now + self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::IssuanceProcessState;

    #[test]
    fn test_transition_resets_count() {
        let now = Utc::now();
        let mut meta = EntityMeta::new("p1", IssuanceProcessState::Submitted, now);
        assert_eq!(meta.record_failure("boom", now), 1);
        assert_eq!(meta.record_failure("boom", now), 2);
        let later = now + Duration::seconds(5);
        meta.transition_to(IssuanceProcessState::Approved, later).unwrap();
        assert_eq!(meta.state(), IssuanceProcessState::Approved);
        assert_eq!(meta.state_count(), 0);
        assert_eq!(meta.state_timestamp(), later);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let now = Utc::now();
        let mut meta = EntityMeta::new("p1", IssuanceProcessState::Submitted, now);
        let err = meta.transition_to(IssuanceProcessState::Delivered, now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(meta.state(), IssuanceProcessState::Submitted);
    }

    #[test]
    fn test_escalate_keeps_detail() {
        let now = Utc::now();
        let mut meta = EntityMeta::new("p1", IssuanceProcessState::Approved, now);
        meta.escalate("delivery refused", now).unwrap();
        assert_eq!(meta.state(), IssuanceProcessState::Errored);
        assert_eq!(meta.error_detail.as_deref(), Some("delivery refused"));
        assert!(meta.is_final());
    }

    #[test]
    fn test_escalate_from_final_state_fails() {
        let now = Utc::now();
        let mut meta = EntityMeta::new("p1", IssuanceProcessState::Delivered, now);
        assert!(meta.escalate("late", now).is_err());
    }

    #[test]
    fn test_lease_blocking() {
        let now = Utc::now();
        let lease = Lease::new("e1", "worker-a", now + Duration::seconds(60));
        assert!(lease.blocks("worker-b", now));
        assert!(!lease.blocks("worker-a", now));
        assert!(!lease.blocks("worker-b", now + Duration::seconds(60)));
    }

    #[test]
    fn test_lease_params_expiry() {
        let now = Utc::now();
        let params = LeaseParams::new("worker-a", Duration::seconds(30));
        let lease = params.lease_for("e1", now);
        assert_eq!(lease.expiry, now + Duration::seconds(30));
        assert_eq!(lease.leaser_id, "worker-a");
    }
}
