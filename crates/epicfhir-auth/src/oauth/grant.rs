//! Token endpoint client for the two grants the bridge performs.
//!
//! Both grants POST `application/x-www-form-urlencoded` bodies to the
//! configured token URL through a shared `reqwest` client carrying the
//! configured timeout. A non-2xx answer is surfaced with the upstream status
//! and body; a 2xx answer without `access_token` is `NoAccessToken`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::pkce::PkceVerifier;
use crate::token::jwt::CLIENT_ASSERTION_TYPE;

/// Successful token endpoint response.
///
/// Only the members the bridge consumes are modelled; everything else Epic
/// returns is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    /// The bearer token.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Token type, normally "Bearer".
    #[serde(default)]
    pub token_type: Option<String>,

    /// Lifetime in seconds as reported by the server.
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Granted scope.
    #[serde(default)]
    pub scope: Option<String>,

    /// Patient in context (SMART launch only).
    #[serde(default)]
    pub patient: Option<String>,
}

/// Which grant a request belongs to; selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    ClientCredentials,
    AuthorizationCode,
}

/// Client for the authorization server's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    http_client: reqwest::Client,
    token_url: String,
}

impl TokenEndpoint {
    /// Creates a client for `token_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self::with_client(http_client, token_url))
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(http_client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
        }
    }

    /// Returns the token endpoint URL.
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Performs the client-credentials grant with a signed `assertion`.
    ///
    /// # Errors
    ///
    /// Returns `TokenRequestFailed` on a non-success status, `NoAccessToken`
    /// if the response lacks a token, and `Http` on transport failures.
    pub async fn client_credentials(
        &self,
        assertion: &str,
        scope: &str,
    ) -> AuthResult<TokenResponse> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion),
            ("scope", scope),
        ];

        self.post(Grant::ClientCredentials, &params).await
    }

    /// Exchanges an authorization `code` for a token (PKCE).
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` on a non-success status, `NoAccessToken`
    /// if the response lacks a token, and `Http` on transport failures.
    pub async fn authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
        verifier: &PkceVerifier,
        audience: &str,
    ) -> AuthResult<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", verifier.as_str()),
            ("aud", audience),
        ];

        self.post(Grant::AuthorizationCode, &params).await
    }

    async fn post(&self, grant: Grant, params: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match grant {
                Grant::ClientCredentials => AuthError::token_request_failed(status.as_u16(), body),
                Grant::AuthorizationCode => AuthError::token_exchange_failed(status.as_u16(), body),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).unwrap_or_default();
        match token.access_token.as_deref() {
            Some(t) if !t.is_empty() => Ok(token),
            _ => Err(AuthError::NoAccessToken),
        }
    }
}
