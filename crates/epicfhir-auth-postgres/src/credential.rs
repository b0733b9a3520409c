//! Credential storage.
//!
//! Rows of `epic_users` map one-to-one onto
//! [`UserCredential`](epicfhir_auth::UserCredential).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use tracing::debug;

use epicfhir_auth::storage::short_hash;
use epicfhir_auth::{
    AuthError, AuthResult, CredentialStorage, NewCredential, SessionBinding, UserCredential,
};

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Types
// =============================================================================

type EpicUserTuple = (
    i64,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<OffsetDateTime>,
    Option<String>,
    Option<OffsetDateTime>,
    OffsetDateTime,
);

const SELECT_COLUMNS: &str = "id, app_audience, user_id, client_id, np_client_id, token, \
     date_registered, session_hash, session_expiry, updated_at";

/// `epic_users` record from database.
#[derive(Debug, Clone)]
pub struct EpicUserRow(pub UserCredential);

impl EpicUserRow {
    fn from_tuple(row: EpicUserTuple) -> Self {
        Self(UserCredential {
            id: row.0,
            app_audience: row.1,
            user_id: row.2,
            client_id: row.3,
            np_client_id: row.4,
            token: row.5,
            date_registered: row.6,
            session_hash: row.7,
            session_expiry: row.8,
            updated_at: row.9,
        })
    }

    /// Unwraps the domain record.
    #[must_use]
    pub fn into_inner(self) -> UserCredential {
        self.0
    }
}

fn map_unique_violation(e: sqlx_core::Error) -> StorageError {
    if let sqlx_core::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StorageError::conflict("session hash already in use");
    }
    StorageError::Database(e)
}

// =============================================================================
// Epic User Storage
// =============================================================================

/// Queries against the `epic_users` table.
pub struct EpicUserStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> EpicUserStorage<'a> {
    /// Create a new storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a credential and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the session hash is taken.
    pub async fn insert(&self, credential: &NewCredential) -> StorageResult<i64> {
        let (id,): (i64,) = query_as(
            r#"
            INSERT INTO epic_users
                (app_audience, user_id, client_id, np_client_id, token,
                 date_registered, session_hash, session_expiry)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6, $7)
            RETURNING id
            "#,
        )
        .bind(credential.app_audience.as_deref())
        .bind(&credential.user_id)
        .bind(&credential.client_id)
        .bind(credential.np_client_id.as_deref())
        .bind(credential.token.as_deref())
        .bind(credential.session_hash.as_deref())
        .bind(credential.session_expiry)
        .fetch_one(self.pool)
        .await
        .map_err(map_unique_violation)?;

        debug!(id, user_id = %credential.user_id, "Registered epic user");
        Ok(id)
    }

    /// Find the record bound to `session_hash` with an expiry after `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_active_by_session_hash(
        &self,
        session_hash: &str,
        now: OffsetDateTime,
    ) -> StorageResult<Option<EpicUserRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM epic_users \
             WHERE session_hash = $1 AND session_expiry > $2 LIMIT 1"
        );
        let row: Option<EpicUserTuple> = query_as(&sql)
            .bind(session_hash)
            .bind(now)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(EpicUserRow::from_tuple))
    }

    /// Find the most recently updated record for a user whose client id or
    /// non-provider client id matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_user_and_client(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> StorageResult<Option<EpicUserRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM epic_users \
             WHERE user_id = $1 AND (client_id = $2 OR np_client_id = $2) \
             ORDER BY updated_at DESC, id DESC LIMIT 1"
        );
        let row: Option<EpicUserTuple> = query_as(&sql)
            .bind(user_id)
            .bind(client_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(EpicUserRow::from_tuple))
    }

    /// Overwrite token, session hash and expiry in a single statement.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no row has `id`, or
    /// `StorageError::Conflict` if the hash belongs to another row.
    pub async fn update_session(&self, id: i64, binding: &SessionBinding) -> StorageResult<()> {
        let result = query(
            r#"
            UPDATE epic_users
            SET token = $2, session_hash = $3, session_expiry = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&binding.token)
        .bind(&binding.session_hash)
        .bind(binding.session_expiry)
        .execute(self.pool)
        .await
        .map_err(map_unique_violation)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("epic_users {id}")));
        }

        debug!(id, session = short_hash(&binding.session_hash), "Session bound");
        Ok(())
    }
}

// =============================================================================
// Arc-Owning Adapter
// =============================================================================

/// PostgreSQL implementation of [`CredentialStorage`].
///
/// Owns an `Arc<PgPool>` so it can be used as `Arc<dyn CredentialStorage>`.
#[derive(Clone)]
pub struct PostgresCredentialStorage {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStorage {
    /// Create a storage over an existing pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        AuthError::storage(e.to_string())
    }
}

#[async_trait]
impl CredentialStorage for PostgresCredentialStorage {
    async fn register(&self, credential: &NewCredential) -> AuthResult<i64> {
        Ok(EpicUserStorage::new(&self.pool).insert(credential).await?)
    }

    async fn find_active_by_session_hash(
        &self,
        session_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<UserCredential>> {
        let row = EpicUserStorage::new(&self.pool)
            .find_active_by_session_hash(session_hash, now)
            .await?;
        Ok(row.map(EpicUserRow::into_inner))
    }

    async fn find_by_user_and_client(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> AuthResult<Option<UserCredential>> {
        let row = EpicUserStorage::new(&self.pool)
            .find_by_user_and_client(user_id, client_id)
            .await?;
        Ok(row.map(EpicUserRow::into_inner))
    }

    async fn update_session(&self, id: i64, binding: &SessionBinding) -> AuthResult<()> {
        Ok(EpicUserStorage::new(&self.pool)
            .update_session(id, binding)
            .await?)
    }
}
