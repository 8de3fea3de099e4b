use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use quill_core::status_list::DEFAULT_STATUS_LIST_SIZE;
use quill_core::{
    BitString, Clock, CoreError, CredentialStatus, StatusList, StatusListResolver, StatusPurpose, VcStatus,
    VerifiableCredential, VerifiableCredentialResource,
};
use quill_store::Repository;
use serde_json::Value;

use crate::error::IssuanceError;

struct ListRecord {
    issuer: String,
    purpose: StatusPurpose,
    bits: BitString,
    next_index: usize,
}

/// Issuer-side bitstring status lists.
///
/// Each participant has one open list per purpose. Indices are handed out
/// sequentially; a full list is closed and a fresh one opened.
pub struct StatusListService {
    base_url: String,
    list_size: usize,
    lists: DashMap<String, ListRecord>,
    open: DashMap<(String, StatusPurpose), String>,
    credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
    clock: Arc<dyn Clock>,
}

impl StatusListService {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn Repository<VerifiableCredentialResource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            list_size: DEFAULT_STATUS_LIST_SIZE,
            lists: DashMap::new(),
            open: DashMap::new(),
            credentials,
            clock,
        }
    }

    pub fn with_list_size(mut self, list_size: usize) -> Self {
        self.list_size = list_size.max(1);
        self
    }

    fn open_list(&self, participant_context_id: &str, issuer: &str, purpose: StatusPurpose) -> String {
        let url = format!(
            "{}/status/{}/{}",
            self.base_url,
            participant_context_id,
            uuid::Uuid::now_v7()
        );
        self.lists.insert(
            url.clone(),
            ListRecord {
                issuer: issuer.to_string(),
                purpose,
                bits: BitString::new(self.list_size),
                next_index: 0,
            },
        );
        tracing::info!(participant = %participant_context_id, purpose = %purpose, url = %url, "status list opened");
        url
    }

    /// Reserve the next free index in the participant's open list.
    pub fn allocate(
        &self,
        participant_context_id: &str,
        issuer: &str,
        purpose: StatusPurpose,
    ) -> Result<CredentialStatus, IssuanceError> {
        let mut open = self
            .open
            .entry((participant_context_id.to_string(), purpose))
            .or_insert_with(|| self.open_list(participant_context_id, issuer, purpose));

        let full = self
            .lists
            .get(open.value())
            .map_or(true, |list| list.next_index >= list.bits.len());
        if full {
            *open = self.open_list(participant_context_id, issuer, purpose);
        }

        let url = open.value().clone();
        let mut list = self
            .lists
            .get_mut(&url)
            .ok_or_else(|| IssuanceError::StatusList(format!("status list '{url}' vanished")))?;
        let index = list.next_index;
        list.next_index += 1;
        Ok(CredentialStatus::bitstring(url.clone(), purpose, index as u64))
    }

    /// Give the credential a revocation entry.
    pub fn add_credential(
        &self,
        participant_context_id: &str,
        credential: VerifiableCredential,
    ) -> Result<VerifiableCredential, IssuanceError> {
        let status = self.allocate(participant_context_id, &credential.issuer, StatusPurpose::Revocation)?;
        tracing::debug!(
            credential_id = %credential.id,
            list = %status.status_list_credential,
            index = status.status_list_index,
            "status list entry added"
        );
        Ok(credential.with_status(status))
    }

    fn set_flag(&self, entry: &CredentialStatus, value: bool) -> Result<(), IssuanceError> {
        let mut list = self
            .lists
            .get_mut(&entry.status_list_credential)
            .ok_or_else(|| IssuanceError::not_found("status list", &entry.status_list_credential))?;
        if list.purpose != entry.status_purpose {
            return Err(IssuanceError::StatusList(format!(
                "status list '{}' is a {} list, entry is for {}",
                entry.status_list_credential, list.purpose, entry.status_purpose
            )));
        }
        let index = usize::try_from(entry.status_list_index)
            .map_err(|_| IssuanceError::StatusList(format!("index {} out of range", entry.status_list_index)))?;
        list.bits.set(index, value)?;
        Ok(())
    }

    fn update_status(&self, credential_id: &str, next: VcStatus) -> Result<VerifiableCredentialResource, IssuanceError> {
        let mut resource = self
            .credentials
            .find_by_id(credential_id)?
            .ok_or_else(|| IssuanceError::not_found("credential", credential_id))?;
        if resource.state == VcStatus::Revoked {
            return Err(IssuanceError::BadRequest(format!("credential '{credential_id}' is revoked")));
        }

        let (purpose, value) = match next {
            VcStatus::Revoked => (StatusPurpose::Revocation, true),
            VcStatus::Suspended => (StatusPurpose::Suspension, true),
            _ => (StatusPurpose::Suspension, false),
        };
        let entry = resource
            .credential()
            .credential_status
            .iter()
            .find(|s| s.status_purpose == purpose)
            .cloned();
        match entry {
            Some(entry) => self.set_flag(&entry, value)?,
            // A revocation bit doubles as suspension when no suspension entry exists.
            None if purpose == StatusPurpose::Suspension => {
                let entry = resource
                    .credential()
                    .credential_status
                    .iter()
                    .find(|s| s.status_purpose == StatusPurpose::Revocation)
                    .cloned()
                    .ok_or_else(|| IssuanceError::StatusList(format!("credential '{credential_id}' has no status entry")))?;
                self.set_flag(&entry, value)?;
            }
            None => {
                return Err(IssuanceError::StatusList(format!(
                    "credential '{credential_id}' has no {purpose} entry"
                )))
            }
        }

        let previous = resource.state;
        resource.state = next;
        resource.timestamp = self.clock.now();
        self.credentials.update(resource.clone())?;
        tracing::info!(credential_id = %credential_id, from = %previous, to = %next, "credential status changed");
        Ok(resource)
    }

    pub fn revoke(&self, credential_id: &str) -> Result<VerifiableCredentialResource, IssuanceError> {
        self.update_status(credential_id, VcStatus::Revoked)
    }

    pub fn suspend(&self, credential_id: &str) -> Result<VerifiableCredentialResource, IssuanceError> {
        self.update_status(credential_id, VcStatus::Suspended)
    }

    pub fn resume(&self, credential_id: &str) -> Result<VerifiableCredentialResource, IssuanceError> {
        self.update_status(credential_id, VcStatus::Issued)
    }

    fn snapshot(&self, url: &str) -> Option<(String, StatusList)> {
        self.lists.get(url).map(|list| {
            (
                list.issuer.clone(),
                StatusList {
                    url: url.to_string(),
                    purpose: list.purpose,
                    bits: list.bits.clone(),
                },
            )
        })
    }

    /// The published form of a list.
    pub fn status_list_credential(&self, url: &str) -> Result<Value, IssuanceError> {
        let (issuer, list) = self
            .snapshot(url)
            .ok_or_else(|| IssuanceError::not_found("status list", url))?;
        Ok(list.to_credential_json(&issuer)?)
    }
}

#[async_trait]
impl StatusListResolver for StatusListService {
    async fn resolve(&self, url: &str) -> Result<StatusList, CoreError> {
        self.snapshot(url)
            .map(|(_, list)| list)
            .ok_or_else(|| CoreError::NotFound(format!("status list '{url}'")))
    }
}
