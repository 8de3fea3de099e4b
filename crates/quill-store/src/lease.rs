use chrono::{DateTime, Utc};

/// Outcome of trying to lease a single entity by id.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseResult<E> {
    Acquired(E),
    AlreadyLeased,
    NotFound,
}

impl<E> LeaseResult<E> {
    pub fn acquired(self) -> Option<E> {
        match self {
            Self::Acquired(e) => Some(e),
            _ => None,
        }
    }
}

/// What happens to the caller's lease when an entity is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Release,
    /// Keep the entity leased (and so invisible to pollers) until the given time.
    HoldUntil(DateTime<Utc>),
}
