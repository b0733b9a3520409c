//! Embedded schema migrations for the `epic_users` table.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use tracing::info;

use crate::{PgPool, StorageError, StorageResult};

/// (version, description, sql) in chronological order.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    20250221000000,
    "create_epic_users",
    include_str!("../migrations/20250221000000_create_epic_users.sql"),
)];

fn build_migrations() -> Vec<Migration> {
    MIGRATIONS
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Applies pending migrations, tracked in `_sqlx_migrations`.
///
/// # Errors
///
/// Returns `StorageError::Migration` if a migration fails.
pub async fn run(pool: &PgPool) -> StorageResult<()> {
    let migrations = build_migrations();
    info!(count = migrations.len(), "Running epic_users migrations");

    let migrator = Migrator {
        migrations: Cow::Owned(migrations),
        ignore_missing: true,
        locking: true,
        no_tx: false,
    };

    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    info!("Migrations completed");
    Ok(())
}
