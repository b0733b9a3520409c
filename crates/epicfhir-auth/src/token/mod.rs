//! Client assertion signing and key publication.
//!
//! - [`keys`] - RSA key loading, signing and JWK export
//! - [`jwt`] - Assertion header and claims
//! - [`jwks`] - JSON Web Key Set types

pub mod jwks;
pub mod jwt;
pub mod keys;

pub use jwks::{Jwk, Jwks};
pub use jwt::{CLIENT_ASSERTION_TYPE, ClientAssertionClaims, SigningAlgorithm, random_hex};
pub use keys::SigningKeys;
