//! JSON Web Key Set types (RFC 7517) for publishing the assertion key.
//!
//! Epic fetches this document to verify client assertions. Besides the
//! standard RSA members the entry repeats the client id as `iss`/`sub` and
//! carries `typ: "JWT"`, which Epic's registration tooling expects.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::token::jwt::SigningAlgorithm;

/// JSON Web Key Set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Creates a new empty JWKS.
    #[must_use]
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Adds a key to the set.
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }
}

impl Default for Jwks {
    fn default() -> Self {
        Self::new()
    }
}

/// An RSA signing key as published to Epic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type, always "RSA".
    pub kty: String,

    /// Key use, always "sig".
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// Client id the key belongs to.
    pub iss: String,

    /// Client id the key belongs to.
    pub sub: String,

    /// Token type, always "JWT".
    pub typ: String,

    /// Key ID.
    pub kid: String,

    /// RSA modulus (base64url, big-endian).
    pub n: String,

    /// RSA public exponent (base64url, big-endian).
    pub e: String,
}

impl Jwk {
    /// Builds a JWK from big-endian modulus and exponent bytes.
    #[must_use]
    pub fn from_rsa(
        modulus: &[u8],
        exponent: &[u8],
        kid: &str,
        algorithm: SigningAlgorithm,
        client_id: &str,
    ) -> Self {
        Self {
            kty: "RSA".to_string(),
            use_: "sig".to_string(),
            alg: algorithm.as_str().to_string(),
            iss: client_id.to_string(),
            sub: client_id.to_string(),
            typ: "JWT".to_string(),
            kid: kid.to_string(),
            n: codec::encode(modulus),
            e: codec::encode(exponent),
        }
    }
}
