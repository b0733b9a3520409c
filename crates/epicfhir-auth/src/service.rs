//! Token acquisition and session binding.
//!
//! [`TokenService`] decides whether a request already has a usable bearer
//! token and otherwise runs one of the two grants:
//!
//! - client credentials with a signed JWT assertion ([`TokenService::ensure_valid_token`])
//! - authorization code with PKCE ([`TokenService::launch`] and
//!   [`TokenService::handle_callback`])
//!
//! # Usage
//!
//! ```ignore
//! use epicfhir_auth::{RequestContext, TokenService};
//!
//! let service = TokenService::new(config, keys, storage)?;
//! let token = service.ensure_valid_token(&mut ctx, "u1", "c1").await?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use cookie::{Cookie, SameSite};
use dashmap::DashMap;
use serde::Serialize;
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use url::Url;

use crate::AuthResult;
use crate::config::{ConfigOverrides, EpicConfig};
use crate::error::AuthError;
use crate::oauth::grant::TokenEndpoint;
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::session::{RequestContext, SESSION_HASH_COOKIE};
use crate::smart::host::validate_host;
use crate::smart::launch::AuthorizationRequest;
use crate::storage::{CredentialStorage, SessionBinding, UserCredential, short_hash};
use crate::token::jwks::Jwks;
use crate::token::jwt::{ClientAssertionClaims, random_hex};
use crate::token::keys::SigningKeys;

/// How long a client-credentials session binding stays valid.
pub const CREDENTIAL_SESSION_LIFETIME: Duration = Duration::hours(1);

/// Random bytes behind a `SessionHash` cookie value (64 hex characters).
pub const SESSION_HASH_BYTES: usize = 32;

/// Result of a completed SMART callback.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct CallbackOutcome {
    #[serde(skip_serializing)]
    pub access_token: String,
    pub patient: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for CallbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackOutcome")
            .field("patient", &self.patient)
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A grant completed on behalf of one credential.
#[derive(Clone)]
struct IssuedGrant {
    token: String,
    session_hash: String,
}

/// Outcome of the most recent grant for one credential, shared with callers
/// that queued while it ran.
#[derive(Clone)]
struct GrantOutcome {
    result: Result<IssuedGrant, AuthError>,
    completed_at: Instant,
}

type GrantSlot = Arc<Mutex<Option<GrantOutcome>>>;

/// Orchestrates token acquisition for system and user flows.
pub struct TokenService {
    config: EpicConfig,
    keys: Arc<SigningKeys>,
    storage: Arc<dyn CredentialStorage>,
    endpoint: TokenEndpoint,
    /// Per-credential lock collapsing concurrent client-credentials grants.
    in_flight: DashMap<i64, GrantSlot>,
}

impl TokenService {
    /// Creates a service over loaded keys and a credential store.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(
        config: EpicConfig,
        keys: Arc<SigningKeys>,
        storage: Arc<dyn CredentialStorage>,
    ) -> AuthResult<Self> {
        let endpoint = TokenEndpoint::new(config.token_url.clone(), config.http_timeout)?;
        Ok(Self {
            config,
            keys,
            storage,
            endpoint,
            in_flight: DashMap::new(),
        })
    }

    /// Returns a service using this configuration with `overrides` applied.
    ///
    /// Keys are reloaded only when a key-related setting changes.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the merged configuration is invalid and
    /// key errors if changed key files cannot be loaded.
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> AuthResult<Self> {
        let merged = self.config.merged(overrides);
        merged
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let keys_changed = merged.private_key_path != self.config.private_key_path
            || merged.public_key_path != self.config.public_key_path
            || merged.jwt_kid != self.config.jwt_kid
            || merged.jwt_alg != self.config.jwt_alg;
        let keys = if keys_changed {
            Arc::new(SigningKeys::load(&merged)?)
        } else {
            Arc::clone(&self.keys)
        };

        Self::new(merged, keys, Arc::clone(&self.storage))
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &EpicConfig {
        &self.config
    }

    /// Returns the credential store.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn CredentialStorage> {
        &self.storage
    }

    /// Publishes the signing key as a JWKS bound to `client_id`.
    #[must_use]
    pub fn public_jwks(&self, client_id: &str) -> Jwks {
        self.keys.public_jwks(client_id)
    }

    // =========================================================================
    // Client credentials
    // =========================================================================

    /// Returns a bearer token for `user_id`/`client_id`, granting one if needed.
    ///
    /// Lookup order: the session's `access_token`, then the credential bound
    /// to the `SessionHash` cookie if not expired, then a fresh
    /// client-credentials grant. A fresh grant rebinds the credential to a new
    /// session hash, sets the `SessionHash` cookie and caches the token in the
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no credential matches, `TokenRequestFailed`
    /// or `NoAccessToken` if the grant fails, and storage or transport errors.
    pub async fn ensure_valid_token(
        &self,
        ctx: &mut RequestContext,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<String> {
        if let Some(token) = ctx.session.access_token.as_ref() {
            tracing::debug!(client_id = %client_id, "Using session access token");
            return Ok(token.clone());
        }

        if let Some(hash) = ctx.session_hash_cookie.as_deref()
            && let Some(credential) = self
                .storage
                .find_active_by_session_hash(hash, OffsetDateTime::now_utc())
                .await?
            && let Some(token) = credential.token
        {
            tracing::debug!(
                credential_id = credential.id,
                session = %short_hash(hash),
                "Using token bound to session hash"
            );
            ctx.session.access_token = Some(token.clone());
            return Ok(token);
        }

        let credential = self
            .storage
            .find_by_user_and_client(user_id, client_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %user_id, client_id = %client_id, "No registered credential");
                AuthError::UserNotFound
            })?;

        let issued = self.single_flight_grant(&credential, client_id).await?;

        let cookie = self.session_hash_cookie(issued.session_hash);
        ctx.jar = std::mem::take(&mut ctx.jar).add(cookie);
        ctx.session.access_token = Some(issued.token.clone());
        Ok(issued.token)
    }

    /// Runs the grant for `credential` unless a concurrent caller that
    /// finished after we started already did. Failures are shared the same
    /// way as successes.
    async fn single_flight_grant(
        &self,
        credential: &UserCredential,
        client_id: &str,
    ) -> AuthResult<IssuedGrant> {
        let started = Instant::now();
        let slot = Arc::clone(self.in_flight.entry(credential.id).or_default().value());
        let mut guard = slot.lock().await;

        let joined = guard
            .as_ref()
            .filter(|outcome| outcome.completed_at >= started)
            .map(|outcome| outcome.result.clone());

        let result = if let Some(result) = joined {
            tracing::debug!(
                credential_id = credential.id,
                succeeded = result.is_ok(),
                "Joined in-flight grant"
            );
            result
        } else {
            let result = self.client_credentials_grant(credential, client_id).await;
            *guard = Some(GrantOutcome {
                result: result.clone(),
                completed_at: Instant::now(),
            });
            result
        };

        drop(guard);
        drop(slot);
        self.in_flight
            .remove_if(&credential.id, |_, slot| Arc::strong_count(slot) == 1);

        result
    }

    async fn client_credentials_grant(
        &self,
        credential: &UserCredential,
        client_id: &str,
    ) -> AuthResult<IssuedGrant> {
        let claims = ClientAssertionClaims::new(
            client_id,
            &self.config.token_url,
            self.config.jwt_exp_seconds,
        );
        let assertion = self.keys.sign(&claims).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to sign client assertion");
        })?;

        let response = self
            .endpoint
            .client_credentials(&assertion, &self.config.oauth_scope)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    client_id = %client_id,
                    error = %e,
                    category = %e.category(),
                    "Client credentials grant failed"
                );
            })?;
        let token = response.access_token.ok_or(AuthError::NoAccessToken)?;

        let binding = SessionBinding {
            token: token.clone(),
            session_hash: random_hex(SESSION_HASH_BYTES),
            session_expiry: OffsetDateTime::now_utc() + CREDENTIAL_SESSION_LIFETIME,
        };
        self.storage.update_session(credential.id, &binding).await?;

        tracing::info!(
            credential_id = credential.id,
            client_id = %client_id,
            session = %short_hash(&binding.session_hash),
            "Issued client credentials token"
        );

        Ok(IssuedGrant {
            token,
            session_hash: binding.session_hash,
        })
    }

    fn session_hash_cookie(&self, session_hash: String) -> Cookie<'static> {
        let max_age = i64::try_from(self.config.session_cookie_lifetime).unwrap_or(i64::MAX);
        let mut builder = Cookie::build((SESSION_HASH_COOKIE, session_hash))
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(Duration::seconds(max_age));
        if let Some(domain) = self.config.cookie_domain.clone() {
            builder = builder.domain(domain);
        }
        builder.build()
    }

    // =========================================================================
    // Authorization code + PKCE
    // =========================================================================

    /// Starts a SMART launch for `client_id` and returns the authorize URL.
    ///
    /// Stores the client id, a fresh `state` and the PKCE verifier in the
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `MissingClientId` for an empty client id, `InvalidHost` if the
    /// request host is outside the allowed domain, and `Configuration` for a
    /// malformed `auth_url` or unsupported challenge method.
    pub fn launch(&self, ctx: &mut RequestContext, client_id: &str) -> AuthResult<Url> {
        if client_id.is_empty() {
            return Err(AuthError::MissingClientId);
        }
        ctx.session.client_id = Some(client_id.to_string());

        validate_host(&ctx.origin, &self.config.allowed_root).inspect_err(|_| {
            tracing::warn!(host = %ctx.origin.host, "Launch from host outside allowed domain");
        })?;
        let redirect_uri = ctx.origin.redirect_uri(&self.config.callback_path);

        let code_challenge_method = self
            .config
            .challenge_method()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let state = random_hex(16);
        let verifier = PkceVerifier::generate();

        let request = AuthorizationRequest {
            client_id: client_id.to_string(),
            scope: self.config.smart_scope.clone(),
            redirect_uri,
            state: state.clone(),
            code_challenge_method,
            code_challenge: PkceChallenge::from_verifier(&verifier),
            aud: self.config.fhir_base.clone(),
        };
        let url = request
            .to_url(&self.config.auth_url)
            .map_err(|e| AuthError::configuration(format!("auth_url: {e}")))?;

        ctx.session.oauth2_state = Some(state);
        ctx.session.code_verifier = Some(verifier.into_inner());

        tracing::info!(client_id = %client_id, host = %ctx.origin.host, "Starting SMART launch");
        Ok(url)
    }

    /// Completes a SMART launch by exchanging `code` for a token.
    ///
    /// The stored state is compared in constant time and consumed before any
    /// network call; a replayed callback fails with `StateMismatch`.
    ///
    /// # Errors
    ///
    /// Returns `MissingCode`, `StateMismatch`, `MissingVerifier`,
    /// `MissingClientId` or `InvalidHost` for invalid callbacks, and
    /// `TokenExchangeFailed` if the authorization server rejects the code.
    pub async fn handle_callback(
        &self,
        ctx: &mut RequestContext,
        code: Option<&str>,
        state: Option<&str>,
    ) -> AuthResult<CallbackOutcome> {
        let code = code.filter(|c| !c.is_empty()).ok_or(AuthError::MissingCode)?;

        if !states_match(ctx.session.oauth2_state.as_deref(), state) {
            tracing::warn!(host = %ctx.origin.host, "Callback state mismatch");
            return Err(AuthError::StateMismatch);
        }

        let verifier = ctx
            .session
            .code_verifier
            .clone()
            .ok_or(AuthError::MissingVerifier)?;
        let verifier = PkceVerifier::new(verifier).map_err(|e| AuthError::internal(e.to_string()))?;
        let client_id = ctx
            .session
            .client_id
            .clone()
            .ok_or(AuthError::MissingClientId)?;

        validate_host(&ctx.origin, &self.config.allowed_root)?;
        let redirect_uri = ctx.origin.redirect_uri(&self.config.callback_path);

        ctx.session.clear_launch_state();

        let response = self
            .endpoint
            .authorization_code(
                code,
                &redirect_uri,
                &client_id,
                &verifier,
                &self.config.fhir_base,
            )
            .await
            .inspect_err(|e| {
                tracing::error!(client_id = %client_id, error = %e, "Authorization code exchange failed");
            })?;
        let access_token = response.access_token.ok_or(AuthError::NoAccessToken)?;

        ctx.session.access_token = Some(access_token.clone());
        if let Some(patient) = response.patient.as_ref() {
            ctx.session.patient_id = Some(patient.clone());
        }

        tracing::info!(
            client_id = %client_id,
            has_patient = response.patient.is_some(),
            "Completed SMART launch"
        );

        Ok(CallbackOutcome {
            access_token,
            patient: response.patient,
            token_type: response.token_type,
            expires_in: response.expires_in,
            scope: response.scope,
        })
    }
}

fn states_match(stored: Option<&str>, received: Option<&str>) -> bool {
    match (stored, received) {
        (Some(stored), Some(received)) => stored.as_bytes().ct_eq(received.as_bytes()).into(),
        _ => false,
    }
}
