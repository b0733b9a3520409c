//! # epicfhir-auth
//!
//! Token acquisition and session binding for backends calling Epic's FHIR API.
//!
//! This crate provides:
//! - Client-credentials grant with RS256-signed JWT client assertions
//! - SMART on FHIR authorization-code launch with PKCE
//! - Binding of issued tokens to browser sessions with expiry
//! - JWKS publication of the assertion signing key
//! - Callback host validation against an allowed root domain
//!
//! ## Modules
//!
//! - [`config`] - Typed Epic configuration and override merging
//! - [`codec`] - Unpadded base64url
//! - [`token`] - Key loading, assertion signing, JWKS export
//! - [`oauth`] - PKCE and the token endpoint client
//! - [`smart`] - Host validation and authorization URL construction
//! - [`storage`] - Credential storage traits and the in-memory backend
//! - [`session`] - Interactive session data and the per-request context
//! - [`service`] - The [`TokenService`] orchestrator
//! - [`http`] - Axum handlers for `/jwks` and the SMART launch

pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod service;
pub mod session;
pub mod smart;
pub mod storage;
pub mod token;

#[cfg(test)]
mod testutil;

pub use config::{ConfigError, ConfigOverrides, EpicConfig};
pub use error::{AuthError, ErrorCategory};
pub use http::{AuthState, SessionContext};
pub use oauth::{PkceChallenge, PkceVerifier, TokenEndpoint, TokenResponse};
pub use service::{CREDENTIAL_SESSION_LIFETIME, CallbackOutcome, TokenService};
pub use session::{
    InteractiveSessionStore, MemorySessionStore, RequestContext, SESSION_COOKIE,
    SESSION_HASH_COOKIE, SessionData,
};
pub use smart::{RequestOrigin, validate_host};
pub use storage::{
    CredentialStorage, MemoryCredentialStorage, NewCredential, SessionBinding, UserCredential,
};
pub use token::{Jwk, Jwks, SigningAlgorithm, SigningKeys};

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;
