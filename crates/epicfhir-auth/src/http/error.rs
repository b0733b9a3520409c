//! Error responses for the auth endpoints.
//!
//! Every failure is rendered as `{"error": "<message>"}`. Upstream token
//! endpoint rejections keep the upstream status code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        if status.is_server_error() {
            tracing::error!(error = %self, category = %self.category(), "Request failed");
        } else {
            tracing::warn!(error = %self, category = %self.category(), "Request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Maps an error to the HTTP status returned to the caller.
#[must_use]
pub fn status_for(error: &AuthError) -> StatusCode {
    if let Some(upstream) = error.upstream_status() {
        return StatusCode::from_u16(upstream).unwrap_or(StatusCode::BAD_GATEWAY);
    }

    match error {
        AuthError::Http { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
        AuthError::Http { .. } => StatusCode::BAD_GATEWAY,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
