//! Per-request session context extractor.
//!
//! Builds a [`RequestContext`] from the inbound cookies and host headers and
//! writes the interactive session back once the handler is done.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use cookie::{Cookie, SameSite};

use crate::AuthResult;
use crate::error::AuthError;
use crate::http::AuthState;
use crate::session::{RequestContext, SESSION_COOKIE, SESSION_HASH_COOKIE, new_session_handle};
use crate::smart::host::RequestOrigin;

/// Interactive session bound to the current request.
#[derive(Debug)]
pub struct SessionContext {
    /// Handle the session is stored under.
    pub handle: String,
    /// Context passed to token operations.
    pub ctx: RequestContext,
}

impl SessionContext {
    /// Saves the session and returns the response cookies, including the
    /// refreshed `epic_session` cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn persist(self, state: &AuthState) -> AuthResult<CookieJar> {
        let Self { handle, ctx } = self;
        state.sessions.save(&handle, ctx.session).await?;

        let max_age = time::Duration::try_from(state.service.config().session_ttl)
            .unwrap_or(time::Duration::hours(1));
        let cookie = Cookie::build((SESSION_COOKIE, handle))
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build();

        Ok(ctx.jar.add(cookie))
    }
}

impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let existing = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        let (handle, session) = match existing {
            Some(handle) => match auth_state.sessions.load(&handle).await? {
                Some(session) => (handle, session),
                // expired or unknown handle: start over under a fresh one
                None => (new_session_handle(), Default::default()),
            },
            None => (new_session_handle(), Default::default()),
        };

        let session_hash_cookie = jar
            .get(SESSION_HASH_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        let origin = request_origin(&parts.headers, auth_state.trust_proxy_headers);

        Ok(Self {
            handle,
            ctx: RequestContext {
                session,
                session_hash_cookie,
                origin,
                jar,
            },
        })
    }
}

/// Derives the request origin from `Host` or, behind a trusted proxy, from
/// `X-Forwarded-Host` / `X-Forwarded-Proto`.
#[must_use]
pub fn request_origin(headers: &HeaderMap, trust_proxy_headers: bool) -> RequestOrigin {
    let forwarded_host = trust_proxy_headers
        .then(|| first_value(headers, "x-forwarded-host"))
        .flatten();
    let host = forwarded_host
        .or_else(|| first_value(headers, header::HOST.as_str()))
        .unwrap_or_default();

    let secure = trust_proxy_headers
        && first_value(headers, "x-forwarded-proto")
            .is_some_and(|p| p.eq_ignore_ascii_case("https"));

    RequestOrigin::new(host, secure)
}

/// First comma-separated value of a header, trimmed.
fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
