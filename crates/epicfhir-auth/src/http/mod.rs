//! Axum handlers for the auth endpoints.
//!
//! # Available Handlers
//!
//! - [`jwks`] - Public key set for Epic (`GET /jwks/{client_id}`)
//! - [`launch`] - SMART launch redirect (`GET /Epic/Launch`)
//!
//! [`context::SessionContext`] is the extractor other handlers use to run
//! token operations against the interactive session.

pub mod context;
pub mod error;
pub mod jwks;
pub mod launch;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::service::TokenService;
use crate::session::InteractiveSessionStore;

pub use context::{SessionContext, request_origin};
pub use error::status_for;
pub use jwks::jwks_handler;
pub use launch::{LaunchParams, launch_handler};

/// Shared state of the auth handlers.
#[derive(Clone)]
pub struct AuthState {
    /// Token acquisition service.
    pub service: Arc<TokenService>,
    /// Interactive session store.
    pub sessions: Arc<dyn InteractiveSessionStore>,
    /// Whether `X-Forwarded-Host`/`X-Forwarded-Proto` are trusted.
    pub trust_proxy_headers: bool,
}

impl AuthState {
    /// Creates the state.
    pub fn new(
        service: Arc<TokenService>,
        sessions: Arc<dyn InteractiveSessionStore>,
        trust_proxy_headers: bool,
    ) -> Self {
        Self {
            service,
            sessions,
            trust_proxy_headers,
        }
    }
}

/// Routes for `/jwks/{client_id}` and `/Epic/Launch`.
pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/jwks/{client_id}", get(jwks_handler))
        .route("/Epic/Launch", get(launch_handler))
        .with_state(state)
}
