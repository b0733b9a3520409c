//! Authentication error types.
//!
//! This module defines every failure the token acquisition protocol can
//! produce. Variants are grouped into client-input problems (4xx) and
//! server or upstream problems (5xx or the upstream status verbatim).

use std::fmt;

/// Errors that can occur while acquiring or binding tokens.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No credential is registered for the given user/client pair.
    #[error("User not found")]
    UserNotFound,

    /// A key file could not be read.
    #[error("Could not read key file {path}: {message}")]
    KeyUnreadable {
        /// The configured path of the key file.
        path: String,
        /// The underlying I/O error.
        message: String,
    },

    /// The key material could not be parsed or is not an RSA key.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },

    /// Signing the client assertion failed.
    #[error("Failed to sign JWT assertion: {message}")]
    SigningFailed {
        /// Description of the signing failure.
        message: String,
    },

    /// The client-credentials token request was rejected upstream.
    #[error("Token request failed: {body}")]
    TokenRequestFailed {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream response body.
        body: String,
    },

    /// The token endpoint answered without an `access_token`.
    #[error("No access token received")]
    NoAccessToken,

    /// The request host is not the allowed root domain or one of its subdomains.
    #[error("Invalid host for redirect URI: {host}")]
    InvalidHost {
        /// The rejected host.
        host: String,
    },

    /// The callback arrived without an authorization code.
    #[error("No authorization code received")]
    MissingCode,

    /// The callback `state` does not match the one stored at launch.
    #[error("State mismatch")]
    StateMismatch,

    /// The interactive session holds no PKCE verifier.
    #[error("Missing PKCE verifier (session expired)")]
    MissingVerifier,

    /// The interactive session holds no client id for the callback.
    #[error("Missing client id (session expired)")]
    MissingClientId,

    /// The authorization-code exchange was rejected upstream.
    #[error("Token exchange failed: {body}")]
    TokenExchangeFailed {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream response body.
        body: String,
    },

    /// The authorization server could not be reached.
    #[error("Upstream request failed: {message}")]
    Http {
        /// Description of the transport failure.
        message: String,
        /// Whether the request hit the configured timeout.
        timed_out: bool,
    },

    /// An error occurred while storing or retrieving credentials.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `KeyUnreadable` error.
    #[must_use]
    pub fn key_unreadable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a new `SigningFailed` error.
    #[must_use]
    pub fn signing_failed(message: impl Into<String>) -> Self {
        Self::SigningFailed {
            message: message.into(),
        }
    }

    /// Creates a new `TokenRequestFailed` error.
    #[must_use]
    pub fn token_request_failed(status: u16, body: impl Into<String>) -> Self {
        Self::TokenRequestFailed {
            status,
            body: body.into(),
        }
    }

    /// Creates a new `TokenExchangeFailed` error.
    #[must_use]
    pub fn token_exchange_failed(status: u16, body: impl Into<String>) -> Self {
        Self::TokenExchangeFailed {
            status,
            body: body.into(),
        }
    }

    /// Creates a new `InvalidHost` error.
    #[must_use]
    pub fn invalid_host(host: impl Into<String>) -> Self {
        Self::InvalidHost { host: host.into() }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound
                | Self::InvalidHost { .. }
                | Self::MissingCode
                | Self::StateMismatch
                | Self::MissingVerifier
                | Self::MissingClientId
        )
    }

    /// Returns `true` if this is a local server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::KeyUnreadable { .. }
                | Self::InvalidKey { .. }
                | Self::SigningFailed { .. }
                | Self::NoAccessToken
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if the failure originated at the authorization server.
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::TokenRequestFailed { .. } | Self::TokenExchangeFailed { .. } | Self::Http { .. }
        )
    }

    /// Returns the upstream status code carried by this error, if any.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::TokenRequestFailed { status, .. } | Self::TokenExchangeFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UserNotFound => ErrorCategory::Credential,
            Self::KeyUnreadable { .. } | Self::InvalidKey { .. } | Self::SigningFailed { .. } => {
                ErrorCategory::KeyMaterial
            }
            Self::TokenRequestFailed { .. }
            | Self::TokenExchangeFailed { .. }
            | Self::NoAccessToken
            | Self::Http { .. } => ErrorCategory::Upstream,
            Self::InvalidHost { .. }
            | Self::MissingCode
            | Self::StateMismatch
            | Self::MissingVerifier
            | Self::MissingClientId => ErrorCategory::Validation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            timed_out: err.is_timeout(),
            // without_url keeps query strings out of logs and responses
            message: err.without_url().to_string(),
        }
    }
}

/// Categories of authentication errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential lookup failures.
    Credential,
    /// Key loading and signing failures.
    KeyMaterial,
    /// Authorization server failures.
    Upstream,
    /// Request validation failures.
    Validation,
    /// Storage failures.
    Infrastructure,
    /// Configuration failures.
    Configuration,
    /// Internal failures.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential => write!(f, "credential"),
            Self::KeyMaterial => write!(f, "key_material"),
            Self::Upstream => write!(f, "upstream"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
