//! Quill Core: fundamental types, errors, and configuration shared by the
//! Quill issuance and holder engines.

pub mod claims;
pub mod clock;
pub mod config;
pub mod credential;
pub mod dcp;
pub mod entity;
pub mod error;
pub mod events;
pub mod holder;
pub mod issuance;
pub mod query;
pub mod status_list;
pub mod transaction;

pub use claims::Claims;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StateMachineConfig;
pub use credential::{
    CredentialFormat, CredentialStatus, CredentialSubject, DataModelVersion, StatusPurpose,
    VcStatus, VerifiableCredential, VerifiableCredentialContainer, VerifiableCredentialResource,
};
pub use entity::{EntityMeta, EntityState, Lease, LeaseParams, StatefulEntity};
pub use error::CoreError;
pub use events::{EngineEvent, EventBus};
pub use holder::{HolderCredentialRequest, HolderRequestState};
pub use issuance::{
    AttestationDefinition, CredentialDefinition, Holder, IssuanceProcess, IssuanceProcessState,
    KeyPairResource, MappingDefinition, ParticipantContext, RuleDefinition,
};
pub use query::{Criterion, CriterionOperator, QuerySpec};
pub use status_list::{BitString, StatusList, StatusListResolver};
pub use transaction::{in_transaction, NoopTransactionContext, TransactionContext};
