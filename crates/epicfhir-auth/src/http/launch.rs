//! SMART launch endpoint.
//!
//! `GET /Epic/Launch?clientId=...` stores the launch state in the
//! interactive session and answers with a 302 to Epic's authorize endpoint.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::AuthError;
use crate::http::AuthState;
use crate::http::context::SessionContext;

/// Query parameters of the launch endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LaunchParams {
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
}

/// Handler for `GET /Epic/Launch`.
///
/// # Response
///
/// - 302 Found: redirect to the authorization endpoint
/// - 400 Bad Request: missing client id or host outside the allowed domain
pub async fn launch_handler(
    State(state): State<AuthState>,
    Query(params): Query<LaunchParams>,
    mut session: SessionContext,
) -> Result<Response, AuthError> {
    let client_id = params.client_id.unwrap_or_default();
    let url = state.service.launch(&mut session.ctx, &client_id)?;
    let jar = session.persist(&state).await?;

    Ok((
        StatusCode::FOUND,
        jar,
        [(header::LOCATION, url.to_string())],
    )
        .into_response())
}
