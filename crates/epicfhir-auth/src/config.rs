//! Epic SMART on FHIR configuration.
//!
//! [`EpicConfig`] is a typed, immutable configuration object loaded once at
//! startup. Per-call adjustments go through [`ConfigOverrides`] and
//! [`EpicConfig::merged`], which applies overrides on top of the stored
//! configuration (defaults < stored config < per-call overrides).
//!
//! # Example (TOML)
//!
//! ```toml
//! [epic]
//! token_url = "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/token"
//! jwt_kid = "Epic-key"
//! private_key_path = "/etc/epic/private.key"
//! public_key_path = "/etc/epic/public.key"
//! http_timeout = "10s"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::oauth::pkce::PkceChallengeMethod;
use crate::token::jwt::SigningAlgorithm;

/// Configuration for talking to Epic's authorization server and FHIR API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EpicConfig {
    /// OAuth 2.0 token endpoint.
    pub token_url: String,

    /// OAuth 2.0 authorization endpoint (browser redirect target).
    pub auth_url: String,

    /// FHIR R4 base URL, also sent as the `aud` parameter.
    pub fhir_base: String,

    /// JWS algorithm for client assertions ("RS256", "RS384" or "RS512").
    pub jwt_alg: String,

    /// Key id placed in the assertion header and the published JWK.
    pub jwt_kid: String,

    /// Lifetime of a client assertion in seconds.
    pub jwt_exp_seconds: u64,

    /// PEM-encoded RSA private key used for signing.
    pub private_key_path: PathBuf,

    /// PEM-encoded RSA public key published via JWKS.
    pub public_key_path: PathBuf,

    /// Max-Age of the `SessionHash` cookie in seconds.
    pub session_cookie_lifetime: u64,

    /// Domain attribute of the `SessionHash` cookie.
    pub cookie_domain: Option<String>,

    /// Scope requested by the client-credentials grant.
    pub oauth_scope: String,

    /// Scope requested by the SMART launch.
    pub smart_scope: String,

    /// PKCE challenge method advertised at launch.
    pub code_challenge_method: String,

    /// Root domain the callback host must belong to.
    pub allowed_root: String,

    /// Path of the callback endpoint on the request host.
    pub callback_path: String,

    /// Timeout for calls to the authorization server.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,

    /// Idle lifetime of an interactive (browser) session.
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl Default for EpicConfig {
    fn default() -> Self {
        Self {
            token_url: "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/token".to_string(),
            auth_url: "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/authorize".to_string(),
            fhir_base: "https://fhir.epic.com/interconnect-fhir-oauth/api/FHIR/R4".to_string(),
            jwt_alg: "RS256".to_string(),
            jwt_kid: "Epic-key".to_string(),
            jwt_exp_seconds: 300,
            private_key_path: PathBuf::from("private.key"),
            public_key_path: PathBuf::from("public.key"),
            session_cookie_lifetime: 3600,
            cookie_domain: Some(".telemedicall.com".to_string()),
            oauth_scope: "system/Patient.read system/Patient.search system/Patient.write"
                .to_string(),
            smart_scope: "openid fhirUser patient.read patient.search launch launch/patient"
                .to_string(),
            code_challenge_method: "S256".to_string(),
            allowed_root: "telemedicall.com".to_string(),
            callback_path: "/Epic/Callback".to_string(),
            http_timeout: Duration::from_secs(10),
            session_ttl: Duration::from_secs(3600),
        }
    }
}

/// Per-call configuration overrides.
///
/// Every field left as `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub token_url: Option<String>,
    pub auth_url: Option<String>,
    pub fhir_base: Option<String>,
    pub jwt_alg: Option<String>,
    pub jwt_kid: Option<String>,
    pub jwt_exp_seconds: Option<u64>,
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
    pub session_cookie_lifetime: Option<u64>,
    pub cookie_domain: Option<String>,
    pub oauth_scope: Option<String>,
    pub smart_scope: Option<String>,
    pub code_challenge_method: Option<String>,
    pub allowed_root: Option<String>,
    pub callback_path: Option<String>,
    #[serde(with = "humantime_serde::option")]
    pub http_timeout: Option<Duration>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl EpicConfig {
    /// Returns a copy of this configuration with `overrides` applied.
    #[must_use]
    pub fn merged(&self, overrides: &ConfigOverrides) -> Self {
        let o = overrides.clone();
        Self {
            token_url: o.token_url.unwrap_or_else(|| self.token_url.clone()),
            auth_url: o.auth_url.unwrap_or_else(|| self.auth_url.clone()),
            fhir_base: o.fhir_base.unwrap_or_else(|| self.fhir_base.clone()),
            jwt_alg: o.jwt_alg.unwrap_or_else(|| self.jwt_alg.clone()),
            jwt_kid: o.jwt_kid.unwrap_or_else(|| self.jwt_kid.clone()),
            jwt_exp_seconds: o.jwt_exp_seconds.unwrap_or(self.jwt_exp_seconds),
            private_key_path: o
                .private_key_path
                .unwrap_or_else(|| self.private_key_path.clone()),
            public_key_path: o
                .public_key_path
                .unwrap_or_else(|| self.public_key_path.clone()),
            session_cookie_lifetime: o
                .session_cookie_lifetime
                .unwrap_or(self.session_cookie_lifetime),
            cookie_domain: o.cookie_domain.or_else(|| self.cookie_domain.clone()),
            oauth_scope: o.oauth_scope.unwrap_or_else(|| self.oauth_scope.clone()),
            smart_scope: o.smart_scope.unwrap_or_else(|| self.smart_scope.clone()),
            code_challenge_method: o
                .code_challenge_method
                .unwrap_or_else(|| self.code_challenge_method.clone()),
            allowed_root: o.allowed_root.unwrap_or_else(|| self.allowed_root.clone()),
            callback_path: o.callback_path.unwrap_or_else(|| self.callback_path.clone()),
            http_timeout: o.http_timeout.unwrap_or(self.http_timeout),
            session_ttl: self.session_ttl,
        }
    }

    /// Parses the configured signing algorithm.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for anything but an RSA algorithm.
    pub fn signing_algorithm(&self) -> Result<SigningAlgorithm, ConfigError> {
        SigningAlgorithm::parse(&self.jwt_alg).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "Invalid jwt_alg: '{}'. Must be RS256, RS384, or RS512",
                self.jwt_alg
            ))
        })
    }

    /// Parses the configured PKCE challenge method.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the method is not supported.
    pub fn challenge_method(&self) -> Result<PkceChallengeMethod, ConfigError> {
        PkceChallengeMethod::parse(&self.code_challenge_method)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is malformed, a required value is empty, or
    /// an algorithm/method is unsupported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("token_url", &self.token_url),
            ("auth_url", &self.auth_url),
            ("fhir_base", &self.fhir_base),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Missing(name.to_string()));
            }
            url::Url::parse(value).map_err(|e| {
                ConfigError::InvalidValue(format!("{name} is not a valid URL: {e}"))
            })?;
        }

        if self.jwt_kid.is_empty() {
            return Err(ConfigError::Missing("jwt_kid".to_string()));
        }

        if self.jwt_exp_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "jwt_exp_seconds must be > 0".to_string(),
            ));
        }

        if self.session_cookie_lifetime == 0 {
            return Err(ConfigError::InvalidValue(
                "session_cookie_lifetime must be > 0".to_string(),
            ));
        }

        if self.allowed_root.trim().is_empty() {
            return Err(ConfigError::Missing("allowed_root".to_string()));
        }

        if !self.callback_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "callback_path must start with '/'".to_string(),
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "http_timeout must be > 0".to_string(),
            ));
        }

        self.signing_algorithm()?;
        self.challenge_method()?;

        Ok(())
    }
}
