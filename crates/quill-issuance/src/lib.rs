//! Quill Issuance: the issuer side of the trust engine.
//!
//! Incoming credential requests become `IssuanceProcess` entities. The
//! SUBMITTED handler gathers evidence through the attestation pipeline,
//! checks it against the definition rules and generates the credentials;
//! the APPROVED handler adds status list entries, delivers the credentials
//! to the holder's credential service and records them as issued.

pub mod attestation;
pub mod delivery;
pub mod error;
pub mod generator;
pub mod mapping;
pub mod process;
pub mod request;
pub mod rules;
pub mod status;

pub use attestation::{
    AttestationContext, AttestationError, AttestationPipeline, AttestationSource, AttestationSourceFactory,
};
pub use delivery::{CredentialStorageClient, HttpCredentialStorageClient};
pub use error::IssuanceError;
pub use generator::{
    decode_credential, verification_method, verify_credential, verify_ldp_credential, CredentialGenerationRequest,
    CredentialGenerator, CredentialGeneratorRegistry, GenerationParams, JwtCredentialGenerator, LdpCredentialGenerator,
};
pub use mapping::map_claims;
pub use process::{ApprovedHandler, SubmittedHandler};
pub use request::IssuanceRequestService;
pub use rules::{CredentialRule, CredentialRuleFactory, RuleEngine, RuleError};
pub use status::StatusListService;
