//! RSA key material loading and signing.
//!
//! Keys are read from the configured PEM files once at startup; a missing or
//! unreadable file is a startup error.
//!
//! Accepted encodings:
//!
//! - private key: PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`)
//! - public key: SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`)

use std::fmt;
use std::path::Path;

use jsonwebtoken::{EncodingKey, encode};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;

use crate::AuthResult;
use crate::config::EpicConfig;
use crate::error::AuthError;
use crate::token::jwks::{Jwk, Jwks};
use crate::token::jwt::{SigningAlgorithm, assertion_header};

/// The service's signing key pair.
///
/// Immutable after loading and safe to share across requests. The `Debug`
/// output never includes key material.
pub struct SigningKeys {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    public_key: RsaPublicKey,
}

impl SigningKeys {
    /// Loads the key pair from the paths in `config`.
    ///
    /// # Errors
    ///
    /// Returns `KeyUnreadable` if either file cannot be read, `InvalidKey` if
    /// either key fails to parse as RSA or the two keys do not belong
    /// together, and `Configuration` for an unsupported `jwt_alg`.
    pub fn load(config: &EpicConfig) -> AuthResult<Self> {
        let algorithm = config
            .signing_algorithm()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let private_pem = read_pem(&config.private_key_path)?;
        let public_pem = read_pem(&config.public_key_path)?;

        let keys = Self::from_pem(&config.jwt_kid, algorithm, &private_pem, &public_pem)?;

        tracing::info!(
            kid = %keys.kid,
            algorithm = %keys.algorithm,
            modulus_bits = keys.public_key.size() * 8,
            "Loaded signing keys"
        );

        Ok(keys)
    }

    /// Builds the key pair from PEM strings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if either key is not a valid RSA key or the
    /// public key does not match the private key.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> AuthResult<Self> {
        let private_key = parse_private_key(private_pem)?;
        let public_key = parse_public_key(public_pem)?;

        if private_key.to_public_key() != public_key {
            return Err(AuthError::invalid_key(
                "public key does not match private key",
            ));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            public_key,
        })
    }

    /// Returns the key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns the public key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Signs `claims` into a compact JWS with header `{alg, typ, kid}`.
    ///
    /// # Errors
    ///
    /// Returns `SigningFailed` if serialization or signing fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        let header = assertion_header(self.algorithm, &self.kid);
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| AuthError::signing_failed(e.to_string()))
    }

    /// Exports the public key as a JWK bound to `client_id`.
    #[must_use]
    pub fn public_jwk(&self, client_id: &str) -> Jwk {
        Jwk::from_rsa(
            &self.public_key.n().to_bytes_be(),
            &self.public_key.e().to_bytes_be(),
            &self.kid,
            self.algorithm,
            client_id,
        )
    }

    /// Exports the public key as a single-entry JWKS bound to `client_id`.
    #[must_use]
    pub fn public_jwks(&self, client_id: &str) -> Jwks {
        let mut jwks = Jwks::new();
        jwks.add_key(self.public_jwk(client_id));
        jwks
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("modulus_bits", &(self.public_key.size() * 8))
            .finish_non_exhaustive()
    }
}

fn read_pem(path: &Path) -> AuthResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| AuthError::key_unreadable(path.display().to_string(), e.to_string()))
}

fn parse_private_key(pem: &str) -> AuthResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| AuthError::invalid_key("private key is not a PEM-encoded RSA key"))
}

/// Parses an RSA public key from SPKI or PKCS#1 PEM.
///
/// # Errors
///
/// Returns `InvalidKey` if the PEM is malformed or holds a non-RSA key.
pub fn parse_public_key(pem: &str) -> AuthResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| AuthError::invalid_key("public key is not a PEM-encoded RSA key"))
}

// ============================================================================
// Tests
// ============================================================================
