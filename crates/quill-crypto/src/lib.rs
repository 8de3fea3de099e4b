pub mod error;
pub mod jws;
pub mod keys;
pub mod participant_keys;
pub mod signing;
pub mod vault;

pub use error::CryptoError;
pub use jws::{decode_unverified, sign_jwt, verify_jwt, JwsHeader};
pub use keys::{KeyPair, PublicKey};
pub use participant_keys::{compose_kid, ParticipantKeys};
pub use signing::{sign, verify, Signature};
pub use vault::{generate_key_pair, resolve_key_pair, InMemoryVault, Vault};
