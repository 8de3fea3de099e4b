//! Quill Holder: the holder side of the trust engine.
//!
//! Requests credentials from issuers and drives those requests with the
//! state-machine runtime, stores delivered credentials, and answers
//! scope-limited presentation queries. A watchdog keeps stored credential
//! states current and asks for replacements before credentials expire.

pub mod client;
pub mod error;
pub mod offers;
pub mod query;
pub mod receiver;
pub mod request;
pub mod revocation;
pub mod scope;
pub mod verification;
pub mod watchdog;

pub use client::{HttpIssuerClient, IssuerClient, IssuerEndpointResolver, StaticEndpointResolver};
pub use error::HolderError;
pub use offers::OfferListener;
pub use query::{CredentialQueryResolver, PresentationQuery, QueryResult};
pub use receiver::CredentialReceiver;
pub use request::{CredentialRequestManager, RequestCredentialsHandler, RequestStatusHandler};
pub use revocation::{
    CachingStatusListResolver, HttpStatusListResolver, RevocationService, RevocationStatus,
    StatusListRevocationService,
};
pub use scope::{CredentialScope, ScopeOperation, ScopeTransformer, DEFAULT_SCOPE_ALIAS};
pub use verification::{CredentialVerifier, IssuerKeyResolver, ParticipantKeyResolver};
pub use watchdog::{CredentialStatusCheck, CredentialWatchdog, WatchdogReport};
