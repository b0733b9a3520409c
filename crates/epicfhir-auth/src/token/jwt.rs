//! Client assertion JWTs (RFC 7523) for the client-credentials grant.
//!
//! Epic authenticates backend services with a short-lived JWT signed by the
//! service's RSA key. The assertion's header names the signing key so that
//! Epic can pick the matching entry from the published JWKS.
//!
//! ## Example
//!
//! ```ignore
//! use epicfhir_auth::token::{ClientAssertionClaims, SigningKeys};
//!
//! let keys = SigningKeys::load(&config)?;
//! let claims = ClientAssertionClaims::new("my-client", &config.token_url, 300);
//! let assertion = keys.sign(&claims)?;
//! ```

use std::fmt;

use jsonwebtoken::{Algorithm, Header};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Assertion type sent alongside `client_assertion`.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

// ============================================================================
// Signing Algorithm
// ============================================================================

/// RSA signing algorithms accepted for client assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256 (Epic's default).
    RS256,
    /// RSASSA-PKCS1-v1_5 with SHA-384.
    RS384,
    /// RSASSA-PKCS1-v1_5 with SHA-512.
    RS512,
}

impl SigningAlgorithm {
    /// Parses an algorithm name as it appears in a JWS header.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "RS512" => Some(Self::RS512),
            _ => None,
        }
    }

    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::RS512 => Algorithm::RS512,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        Self::RS256
    }
}

/// Builds the `{alg, typ: "JWT", kid}` header of a client assertion.
#[must_use]
pub fn assertion_header(algorithm: SigningAlgorithm, kid: &str) -> Header {
    let mut header = Header::new(algorithm.to_jwt_algorithm());
    header.typ = Some("JWT".to_string());
    header.kid = Some(kid.to_string());
    header
}

// ============================================================================
// Claims
// ============================================================================

/// Claims of a client-credentials assertion.
///
/// `iss` and `sub` are both the client id; `aud` is the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientAssertionClaims {
    /// Issuer (the client id).
    pub iss: String,

    /// Subject (the client id).
    pub sub: String,

    /// Audience (the token endpoint URL).
    pub aud: String,

    /// Unique assertion id, 128 random bits as hex.
    pub jti: String,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

impl ClientAssertionClaims {
    /// Creates claims issued now and expiring after `lifetime_secs`.
    #[must_use]
    pub fn new(client_id: &str, token_url: &str, lifetime_secs: u64) -> Self {
        Self::issued_at(
            client_id,
            token_url,
            OffsetDateTime::now_utc().unix_timestamp(),
            lifetime_secs,
        )
    }

    /// Creates claims with an explicit issue time.
    #[must_use]
    pub fn issued_at(client_id: &str, token_url: &str, iat: i64, lifetime_secs: u64) -> Self {
        let lifetime = i64::try_from(lifetime_secs).unwrap_or(i64::MAX - iat);
        Self {
            iss: client_id.to_string(),
            sub: client_id.to_string(),
            aud: token_url.to_string(),
            jti: random_hex(16),
            iat,
            exp: iat.saturating_add(lifetime),
        }
    }
}

/// Returns `len` random bytes from the thread RNG, hex-encoded.
#[must_use]
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// Tests
// ============================================================================
