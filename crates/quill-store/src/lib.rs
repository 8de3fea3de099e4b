//! Quill Store: persistence seams for the engines.
//!
//! `StateEntityStore` carries the lease protocol the state-machine runtime
//! relies on; `Repository` covers plain keyed records. Both ship with
//! DashMap-backed in-memory implementations.

pub mod error;
pub mod lease;
pub mod repository;
pub mod state_store;

pub use error::StoreError;
pub use lease::{LeaseAction, LeaseResult};
pub use repository::{Identified, InMemoryRepository, Repository};
pub use state_store::{InMemoryStateEntityStore, StateEntityStore};
