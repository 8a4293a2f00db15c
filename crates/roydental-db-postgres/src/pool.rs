//! Connection pool for the clinic database.

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Opens a pool sized and timed by `config`.
///
/// One connection is opened eagerly so a bad URL fails here rather than on
/// the first repository call.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    config.check()?;
    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout_ms,
        "Opening PostgreSQL pool"
    );

    let pool = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .min_connections(1)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(config.idle_timeout())
        .connect(&config.url)
        .await?;

    debug!("PostgreSQL pool ready");
    Ok(pool)
}

/// Round-trips `SELECT 1` on a pooled connection.
#[instrument(skip(pool))]
pub async fn test_connection(pool: &PgPool) -> Result<()> {
    sqlx_core::query::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(PostgresError::from)?;
    Ok(())
}

/// Replaces the password in a connection URL with `****` for logging.
pub fn mask_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://clinic:secret@db:5432/roydental"),
            "postgres://clinic:****@db:5432/roydental"
        );
        assert_eq!(mask_password("postgres://db/roydental"), "postgres://db/roydental");
        assert_eq!(
            mask_password("postgres://clinic@db/roydental"),
            "postgres://clinic@db/roydental"
        );
        assert_eq!(mask_password("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_zero_pool_size_rejected_before_connecting() {
        let config = PostgresConfig::new("postgres://localhost/roydental").with_pool_size(0);
        let err = create_pool(&config).await.unwrap_err();
        assert!(matches!(err, PostgresError::Config { .. }));
    }
}
