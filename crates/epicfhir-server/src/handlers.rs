//! Registration, SMART callback and FHIR proxy handlers.
//!
//! Proxy handlers obtain a bearer token for `{user_id}`/`{client_id}` via
//! [`TokenService::ensure_valid_token`](epicfhir_auth::TokenService::ensure_valid_token)
//! and always write the interactive session back, so a token cached in the
//! session or a fresh `SessionHash` cookie survives upstream failures.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use epicfhir_auth::{NewCredential, SessionContext};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::fhir::PatientInput;
use crate::server::AppState;

async fn respond(
    state: &AppState,
    session: SessionContext,
    result: Result<Response, ApiError>,
) -> Response {
    match session.persist(&state.auth).await {
        Ok(jar) => (jar, result.into_response()).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn bearer(
    state: &AppState,
    session: &mut SessionContext,
    user_id: &str,
    client_id: &str,
) -> Result<String, ApiError> {
    Ok(state
        .auth
        .service
        .ensure_valid_token(&mut session.ctx, user_id, client_id)
        .await?)
}

// ---------------- Registration ----------------

/// `POST /Epic/users`
pub async fn register_user(
    State(state): State<AppState>,
    Json(credential): Json<NewCredential>,
) -> Result<impl IntoResponse, ApiError> {
    if credential.user_id.trim().is_empty() || credential.client_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId and clientId are required"));
    }

    let id = state.auth.service.storage().register(&credential).await?;
    info!(id, user_id = %credential.user_id, client_id = %credential.client_id, "Registered Epic user");

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

// ---------------- SMART callback ----------------

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// `GET /Epic/Callback?code&state`
///
/// Returns the launched patient's `$summary`, or `{"authorized": true}`
/// when the launch carried no patient context.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    mut session: SessionContext,
) -> Response {
    let result = async {
        let outcome = state
            .auth
            .service
            .handle_callback(
                &mut session.ctx,
                params.code.as_deref(),
                params.state.as_deref(),
            )
            .await?;

        match outcome.patient.as_deref() {
            Some(patient) => state
                .fhir
                .patient_summary(&outcome.access_token, patient)
                .await
                .map(IntoResponse::into_response),
            None => Ok(Json(json!({ "authorized": true })).into_response()),
        }
    }
    .await;

    respond(&state, session, result).await
}

// ---------------- FHIR proxy ----------------

/// `GET /Epic/{user_id}/{client_id}/List`
pub async fn list_search(
    State(state): State<AppState>,
    Path((user_id, client_id)): Path<(String, String)>,
    mut session: SessionContext,
) -> Response {
    let result = async {
        let token = bearer(&state, &mut session, &user_id, &client_id).await?;
        state
            .fhir
            .list_search(&token)
            .await
            .map(IntoResponse::into_response)
    }
    .await;

    respond(&state, session, result).await
}

/// `GET /Epic/{user_id}/{client_id}/MyLists`
pub async fn my_list_search(
    State(state): State<AppState>,
    Path((user_id, client_id)): Path<(String, String)>,
    mut session: SessionContext,
) -> Response {
    let result = async {
        let token = bearer(&state, &mut session, &user_id, &client_id).await?;
        state
            .fhir
            .my_list_search(&token)
            .await
            .map(IntoResponse::into_response)
    }
    .await;

    respond(&state, session, result).await
}

/// `GET /Epic/{user_id}/{client_id}/List/{list_id}`
pub async fn list_read(
    State(state): State<AppState>,
    Path((user_id, client_id, list_id)): Path<(String, String, String)>,
    mut session: SessionContext,
) -> Response {
    let result = async {
        if list_id.trim().is_empty() {
            return Err(ApiError::bad_request("No List ID received"));
        }
        let token = bearer(&state, &mut session, &user_id, &client_id).await?;
        state
            .fhir
            .list_read(&token, &list_id)
            .await
            .map(IntoResponse::into_response)
    }
    .await;

    respond(&state, session, result).await
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryParams {
    #[serde(default, rename = "patientId")]
    pub patient_id: Option<String>,
}

/// `GET /Epic/{user_id}/{client_id}/Patient/summary[?patientId=]`
///
/// Without `patientId` the patient selected during the SMART launch is used.
pub async fn patient_summary(
    State(state): State<AppState>,
    Path((user_id, client_id)): Path<(String, String)>,
    Query(params): Query<SummaryParams>,
    mut session: SessionContext,
) -> Response {
    let result = async {
        let patient_id = params
            .patient_id
            .filter(|p| !p.is_empty())
            .or_else(|| session.ctx.session.patient_id.clone())
            .ok_or_else(|| ApiError::not_found("No patient selected from Epic"))?;
        let token = bearer(&state, &mut session, &user_id, &client_id).await?;
        state
            .fhir
            .patient_summary(&token, &patient_id)
            .await
            .map(IntoResponse::into_response)
    }
    .await;

    respond(&state, session, result).await
}

/// `POST /Epic/{user_id}/{client_id}/Patient`
pub async fn patient_create(
    State(state): State<AppState>,
    Path((user_id, client_id)): Path<(String, String)>,
    mut session: SessionContext,
    Json(input): Json<PatientInput>,
) -> Response {
    let result = async {
        input.validate()?;
        let token = bearer(&state, &mut session, &user_id, &client_id).await?;
        let created = state.fhir.patient_create(&token, &input).await?;
        let status = StatusCode::from_u16(created.status).unwrap_or(StatusCode::CREATED);
        Ok::<_, ApiError>((status, Json(created)).into_response())
    }
    .await;

    respond(&state, session, result).await
}
