//! Registered Epic credentials and their session binding.
//!
//! A [`UserCredential`] identifies a (user, client) pair that may be issued
//! a system token. Each successful client-credentials grant overwrites the
//! record's token, session hash and expiry in one atomic update.
//!
//! # Security Considerations
//!
//! - Never log tokens; session hashes only as a short prefix
//! - `session_hash` must be unique across all records
//! - `update_session` must write token, hash and expiry together or not at all

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;

/// A persisted credential record (`epic_users` row).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserCredential {
    /// Surrogate key.
    pub id: i64,

    /// Audience the application registered for.
    pub app_audience: Option<String>,

    /// Application user id.
    pub user_id: String,

    /// Epic client id.
    pub client_id: String,

    /// Non-provider client id, accepted as an alias during lookup.
    pub np_client_id: Option<String>,

    /// Last bearer token issued for this record.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// When the record was registered.
    #[serde(with = "time::serde::rfc3339::option")]
    pub date_registered: Option<OffsetDateTime>,

    /// Random handle handed to the browser in the `SessionHash` cookie.
    #[serde(skip_serializing)]
    pub session_hash: Option<String>,

    /// Absolute expiry of `token`/`session_hash`.
    #[serde(with = "time::serde::rfc3339::option")]
    pub session_expiry: Option<OffsetDateTime>,

    /// Last modification, used to pick the most recent of several matches.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserCredential {
    /// Returns `true` if `client_id` matches either the client id or the
    /// non-provider alias.
    #[must_use]
    pub fn matches_client(&self, client_id: &str) -> bool {
        self.client_id == client_id || self.np_client_id.as_deref() == Some(client_id)
    }

    /// Returns `true` if the session binding is still valid at `now`.
    #[must_use]
    pub fn is_session_active(&self, now: OffsetDateTime) -> bool {
        self.session_expiry.is_some_and(|exp| exp > now) && self.token.is_some()
    }
}

/// Input to [`CredentialStorage::register`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCredential {
    #[serde(default)]
    pub app_audience: Option<String>,
    pub user_id: String,
    pub client_id: String,
    #[serde(default)]
    pub np_client_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub session_hash: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub session_expiry: Option<OffsetDateTime>,
}

/// The three fields a successful grant writes together.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub token: String,
    pub session_hash: String,
    pub session_expiry: OffsetDateTime,
}

impl std::fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinding")
            .field("session_hash", &short_hash(&self.session_hash))
            .field("session_expiry", &self.session_expiry)
            .finish_non_exhaustive()
    }
}

/// Returns the first 8 characters of a session hash for log output.
#[must_use]
pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Storage trait for registered credentials.
///
/// # Implementations
///
/// - [`MemoryCredentialStorage`](super::MemoryCredentialStorage) in this crate
/// - PostgreSQL (in `epicfhir-auth-postgres` crate)
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    /// Registers a credential and returns its internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the session hash is already taken or the storage
    /// operation fails.
    async fn register(&self, credential: &NewCredential) -> AuthResult<i64>;

    /// Finds the credential bound to `session_hash` whose expiry is after `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_active_by_session_hash(
        &self,
        session_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<UserCredential>>;

    /// Finds the most recently updated credential for `user_id` whose client
    /// id or non-provider client id equals `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_user_and_client(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<UserCredential>>;

    /// Atomically overwrites token, session hash and expiry of record `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist, the hash collides with
    /// another record, or the storage operation fails.
    async fn update_session(&self, id: i64, binding: &SessionBinding) -> AuthResult<()>;
}
