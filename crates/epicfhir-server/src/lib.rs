//! Epic SMART on FHIR server.
//!
//! Serves the JWKS and SMART launch endpoints of [`epicfhir_auth`], the
//! SMART callback, credential registration and a bearer-authenticated proxy
//! to Epic's FHIR API.

pub mod config;
pub mod error;
pub mod fhir;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use server::{AppState, EpicFhirServer, build_router, build_state};
