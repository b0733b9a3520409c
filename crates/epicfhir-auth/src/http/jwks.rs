//! JWKS endpoint HTTP handler.
//!
//! Serves `GET /jwks/{client_id}`, the key set Epic downloads to verify the
//! client assertions this service signs for `client_id`.
//!
//! # References
//!
//! - [RFC 7517 - JSON Web Key](https://tools.ietf.org/html/rfc7517)
//! - [Epic backend OAuth](https://fhir.epic.com/Documentation?docId=oauth2&section=BackendOAuth2Guide)

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::http::AuthState;

/// Handler for `GET /jwks/{client_id}`.
///
/// # Example Response
///
/// ```json
/// {
///   "keys": [{
///     "kty": "RSA", "use": "sig", "alg": "RS256",
///     "iss": "my-client", "sub": "my-client", "typ": "JWT",
///     "kid": "Epic-key", "n": "...", "e": "AQAB"
///   }]
/// }
/// ```
pub async fn jwks_handler(
    State(state): State<AuthState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    let jwks = state.service.public_jwks(&client_id);
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(jwks),
    )
}
