//! SMART on FHIR launch support.
//!
//! - [`host`] - Request origin and allowed-domain validation
//! - [`launch`] - Authorization request construction

pub mod host;
pub mod launch;

pub use host::{RequestOrigin, is_allowed_host, validate_host};
pub use launch::AuthorizationRequest;
