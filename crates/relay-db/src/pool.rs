//! Connection pool construction.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::config::DbConfig;

/// Create a connection pool with sensible defaults.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))?;
    Ok(pool)
}

/// Create a pool, retrying every two seconds until the database is reachable.
///
/// Used at worker startup where the database may still be coming up.
pub async fn create_pool_with_retry(config: &DbConfig) -> PgPool {
    loop {
        match create_pool(config).await {
            Ok(pool) => return pool,
            Err(e) => {
                warn!(error = %e, "database not reachable, retrying in 2s");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
