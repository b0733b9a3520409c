//! PKCE (Proof Key for Code Exchange, RFC 7636) for the SMART launch.
//!
//! This side of the exchange is the *client*: it mints a verifier, sends the
//! S256 challenge with the authorization request and presents the verifier
//! at the token endpoint. Only S256 is supported; SMART on FHIR forbids
//! `plain`.
//!
//! # Example
//!
//! ```
//! use epicfhir_auth::oauth::{PkceChallenge, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//! assert_eq!(challenge, PkceChallenge::from_verifier(&verifier));
//! ```

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::codec;

/// Number of random bytes behind a generated verifier (86 base64url chars).
pub const VERIFIER_ENTROPY_BYTES: usize = 64;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside `[A-Za-z0-9-._~]`.
    #[error("Invalid verifier characters: must be unreserved URL characters")]
    InvalidVerifierCharacters,

    /// Unsupported challenge method (only S256 is supported).
    #[error("Unsupported challenge method: {0}. Only S256 is supported.")]
    UnsupportedMethod(String),
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    /// SHA-256 hash (the only supported method).
    #[default]
    S256,
}

impl PkceChallengeMethod {
    /// Parse challenge method from string.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything but "S256".
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "S256" => Ok(Self::S256),
            "plain" => Err(PkceError::UnsupportedMethod(
                "plain (forbidden by SMART on FHIR)".to_string(),
            )),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier.
///
/// Kept in the interactive session between launch and callback and never
/// logged.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Wraps a verifier restored from the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not 43-128 characters or the value
    /// contains characters other than `[A-Za-z0-9-._~]`.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generates a verifier from 64 bytes of OS-seeded randomness.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(codec::encode(bytes))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the verifier and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkceVerifier(..)")
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// PKCE code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Derives the S256 challenge for `verifier`.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let digest = Sha256::digest(verifier.0.as_bytes());
        Self(codec::encode(digest))
    }

    /// Returns `true` if `verifier` hashes to this challenge.
    #[must_use]
    pub fn matches(&self, verifier: &PkceVerifier) -> bool {
        *self == Self::from_verifier(verifier)
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_verifier_shape() {
        let verifier = PkceVerifier::generate();
        // 64 bytes -> ceil(64 * 4 / 3) = 86 unpadded characters
        assert_eq!(verifier.as_str().len(), 86);
        assert!(PkceVerifier::new(verifier.as_str().to_string()).is_ok());
    }

    #[test]
    fn test_generated_verifiers_are_unique() {
        let v1 = PkceVerifier::generate();
        let v2 = PkceVerifier::generate();
        let v3 = PkceVerifier::generate();

        assert_ne!(v1, v2);
        assert_ne!(v2, v3);
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert!(matches!(
            PkceVerifier::new("a".repeat(42)),
            Err(PkceError::InvalidVerifierLength(42))
        ));
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(matches!(
            PkceVerifier::new("a".repeat(129)),
            Err(PkceError::InvalidVerifierLength(129))
        ));
    }

    #[test]
    fn test_verifier_characters() {
        let invalid = format!("{}+/=", "a".repeat(50));
        assert!(matches!(
            PkceVerifier::new(invalid),
            Err(PkceError::InvalidVerifierCharacters)
        ));
    }

    #[test]
    fn test_challenge_is_deterministic_sha256() {
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);

        assert_eq!(challenge, PkceChallenge::from_verifier(&verifier));
        assert_eq!(challenge.as_str().len(), 43);
        assert_eq!(
            challenge.as_str(),
            codec::encode(Sha256::digest(verifier.as_str().as_bytes()))
        );
        assert!(challenge.matches(&verifier));
        assert!(!challenge.matches(&PkceVerifier::generate()));
    }

    #[test]
    fn test_rfc7636_appendix_b_test_vector() {
        let verifier =
            PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();

        assert_eq!(
            PkceChallenge::from_verifier(&verifier).as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_challenge_method_parse() {
        assert_eq!(PkceChallengeMethod::parse("S256").unwrap(), PkceChallengeMethod::S256);

        let err = PkceChallengeMethod::parse("plain").unwrap_err();
        assert!(err.to_string().contains("SMART on FHIR"));
        assert!(PkceChallengeMethod::parse("S512").is_err());
        assert_eq!(PkceChallengeMethod::default().to_string(), "S256");
    }

    #[test]
    fn test_verifier_debug_is_redacted() {
        let verifier = PkceVerifier::generate();
        assert!(!format!("{verifier:?}").contains(verifier.as_str()));
    }
}
