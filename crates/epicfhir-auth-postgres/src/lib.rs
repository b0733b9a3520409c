//! PostgreSQL storage backend for epicfhir-auth
//!
//! Persists registered Epic credentials in the `epic_users` table and
//! implements [`epicfhir_auth::CredentialStorage`] on top of it.
//!
//! # Example
//!
//! ```ignore
//! use epicfhir_auth_postgres::PostgresCredentialStorage;
//!
//! let pool = epicfhir_auth_postgres::create_pool(url, 10, Duration::from_secs(5)).await?;
//! epicfhir_auth_postgres::migrations::run(&pool).await?;
//! let storage = PostgresCredentialStorage::new(Arc::new(pool));
//! ```

pub mod credential;
pub mod migrations;
pub mod pool;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use credential::{EpicUserRow, EpicUserStorage, PostgresCredentialStorage};
pub use pool::{create_pool, mask_password};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during credential storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violated (duplicate session hash).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a server error (5xx equivalent).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Migration(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Tests
// =============================================================================
