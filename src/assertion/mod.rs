//! Signed Assertions
//!
//! id_token verification against a provider's published key set.

pub mod jwks;
pub mod verifier;

pub use jwks::{HttpJwksSource, JwksSource, MockJwksSource, DEFAULT_JWKS_TTL};
pub use verifier::{Claims, IdTokenVerifier};
