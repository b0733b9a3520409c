//! Connection pool creation.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::Postgres;
use tracing::{debug, info, instrument};

use crate::{PgPool, StorageResult};

/// Creates a pool with `max_connections` connections.
///
/// # Errors
///
/// Returns `StorageError::Database` if the database is unreachable.
#[instrument(skip(url), fields(url = %mask_password(url)))]
pub async fn create_pool(
    url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> StorageResult<PgPool> {
    info!(max_connections, "Creating PostgreSQL connection pool");

    let pool = PoolOptions::<Postgres>::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(url)
        .await?;

    debug!("PostgreSQL connection pool created");
    Ok(pool)
}

/// Replaces the password in a connection URL with `***`.
#[must_use]
pub fn mask_password(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}://{}:***{}",
            &url[..scheme_end],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://epic:secret@db:5432/epic"),
            "postgres://epic:***@db:5432/epic"
        );
        assert_eq!(
            mask_password("postgres://epic@db/epic"),
            "postgres://epic@db/epic"
        );
        assert_eq!(mask_password("not a url"), "not a url");
    }
}
