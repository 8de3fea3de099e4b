use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use quill_core::{
    AttestationDefinition, CredentialDefinition, Holder, KeyPairResource, ParticipantContext, QuerySpec,
    VerifiableCredentialResource,
};

use crate::error::StoreError;

/// A record addressable by a stable key.
pub trait Identified {
    const KIND: &'static str;

    fn key(&self) -> &str;
}

/// Keyed CRUD plus criteria queries.
pub trait Repository<T>: Send + Sync {
    fn create(&self, item: T) -> Result<(), StoreError>;

    fn update(&self, item: T) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError>;

    fn query(&self, spec: &QuerySpec) -> Result<Vec<T>, StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// DashMap-backed `Repository`. Query results are ordered by key.
pub struct InMemoryRepository<T> {
    items: DashMap<String, T>,
}

impl<T> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self { items: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Repository<T> for InMemoryRepository<T>
where
    T: Identified + Serialize + Clone + Send + Sync,
{
    fn create(&self, item: T) -> Result<(), StoreError> {
        match self.items.entry(item.key().to_string()) {
            Entry::Occupied(slot) => Err(StoreError::AlreadyExists {
                kind: T::KIND,
                id: slot.key().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(item);
                Ok(())
            }
        }
    }

    fn update(&self, item: T) -> Result<(), StoreError> {
        let mut existing = self.items.get_mut(item.key()).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: item.key().to_string(),
        })?;
        *existing = item;
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.items.get(id).map(|e| e.value().clone()))
    }

    fn query(&self, spec: &QuerySpec) -> Result<Vec<T>, StoreError> {
        let mut matched = Vec::new();
        for entry in self.items.iter() {
            let json = serde_json::to_value(entry.value()).map_err(|e| StoreError::Backend(e.to_string()))?;
            if spec.matches(&json) {
                matched.push(entry.value().clone());
            }
        }
        matched.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(spec.page(matched))
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.items.remove(id).map(|_| ()).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })
    }
}

impl Identified for VerifiableCredentialResource {
    const KIND: &'static str = "credential";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Identified for CredentialDefinition {
    const KIND: &'static str = "credential definition";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Identified for AttestationDefinition {
    const KIND: &'static str = "attestation definition";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Identified for Holder {
    const KIND: &'static str = "holder";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Identified for ParticipantContext {
    const KIND: &'static str = "participant context";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Identified for KeyPairResource {
    const KIND: &'static str = "key pair";

    fn key(&self) -> &str {
        &self.id
    }
}
