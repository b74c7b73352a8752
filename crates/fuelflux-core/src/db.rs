use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::error::StoreError;

pub type DbPool = Pool<Postgres>;

/// Establish a Postgres connection pool for the pipeline stages.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DbPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    info!(max_connections, "Database connection pool established");
    Ok(pool)
}

/// Run the medallion-table migrations embedded at compile time.
pub async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
