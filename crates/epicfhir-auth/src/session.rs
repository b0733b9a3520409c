//! Interactive (browser) session state and the per-request context.
//!
//! [`SessionData`] is the server-side attribute bag of one browser session.
//! It is persisted by an [`InteractiveSessionStore`] under a random handle
//! carried in the `epic_session` cookie. Every token operation receives a
//! [`RequestContext`] explicitly instead of reaching for ambient state.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum_extra::extract::cookie::CookieJar;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::smart::host::RequestOrigin;
use crate::token::jwt::random_hex;

/// Name of the cookie carrying the interactive session handle.
pub const SESSION_COOKIE: &str = "epic_session";

/// Name of the cookie binding a browser to a stored credential.
pub const SESSION_HASH_COOKIE: &str = "SessionHash";

/// Attributes held in an interactive session.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionData {
    /// Bearer token usable for FHIR calls in this session.
    #[serde(default)]
    pub access_token: Option<String>,

    /// CSRF nonce of a pending SMART launch.
    #[serde(default)]
    pub oauth2_state: Option<String>,

    /// PKCE verifier of a pending SMART launch.
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Client id of a pending SMART launch.
    #[serde(default, rename = "ClientID")]
    pub client_id: Option<String>,

    /// Patient in context after a SMART launch.
    #[serde(default, rename = "PatientID", alias = "patient_id")]
    pub patient_id: Option<String>,
}

impl SessionData {
    /// Drops the one-shot launch state after a callback.
    pub fn clear_launch_state(&mut self) {
        self.oauth2_state = None;
        self.code_verifier = None;
    }
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("has_access_token", &self.access_token.is_some())
            .field("launch_pending", &self.oauth2_state.is_some())
            .field("client_id", &self.client_id)
            .field("patient_id", &self.patient_id)
            .finish()
    }
}

/// Everything a token operation may read or write for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Interactive session attributes; persisted by the caller afterwards.
    pub session: SessionData,

    /// Value of the inbound `SessionHash` cookie, if any.
    pub session_hash_cookie: Option<String>,

    /// Scheme and host the request arrived on.
    pub origin: RequestOrigin,

    /// Response cookies to send back.
    pub jar: CookieJar,
}

impl RequestContext {
    /// Creates a context with an empty session and no cookies.
    #[must_use]
    pub fn new(origin: RequestOrigin) -> Self {
        Self {
            session: SessionData::default(),
            session_hash_cookie: None,
            origin,
            jar: CookieJar::new(),
        }
    }

    /// Sets the session attributes.
    #[must_use]
    pub fn with_session(mut self, session: SessionData) -> Self {
        self.session = session;
        self
    }

    /// Sets the inbound `SessionHash` cookie.
    #[must_use]
    pub fn with_session_hash(mut self, hash: impl Into<String>) -> Self {
        self.session_hash_cookie = Some(hash.into());
        self
    }
}

/// Storage for interactive sessions.
#[async_trait]
pub trait InteractiveSessionStore: Send + Sync {
    /// Loads a live session by handle.
    async fn load(&self, handle: &str) -> AuthResult<Option<SessionData>>;

    /// Stores a session under `handle`, refreshing its lifetime.
    async fn save(&self, handle: &str, data: SessionData) -> AuthResult<()>;

    /// Removes a session.
    async fn remove(&self, handle: &str) -> AuthResult<()>;
}

/// Generates a new 128-bit session handle.
#[must_use]
pub fn new_session_handle() -> String {
    random_hex(16)
}

struct SessionEntry {
    data: SessionData,
    expires_at: Instant,
}

/// In-memory session store with idle expiry.
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl MemorySessionStore {
    /// Creates a store whose sessions expire `ttl` after their last save.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Removes expired sessions and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }
}

#[async_trait]
impl InteractiveSessionStore for MemorySessionStore {
    async fn load(&self, handle: &str) -> AuthResult<Option<SessionData>> {
        let now = Instant::now();
        if let Some(entry) = self.sessions.get(handle) {
            if entry.expires_at > now {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.sessions.remove(handle);
        }
        Ok(None)
    }

    async fn save(&self, handle: &str, data: SessionData) -> AuthResult<()> {
        self.sessions.insert(
            handle.to_string(),
            SessionEntry {
                data,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, handle: &str) -> AuthResult<()> {
        self.sessions.remove(handle);
        Ok(())
    }
}
