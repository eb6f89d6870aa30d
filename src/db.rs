//! Postgres pool construction for the `postgres-store` backend.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Build the process-wide pool. Connections are opened lazily, so a database
/// that is down at boot surfaces as errors on first acquire rather than a
/// startup failure.
pub fn connect_pool(db_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(45))
        .connect_lazy(db_url)?;
    log::info!("postgres pool ready (max 10 connections)");
    Ok(pool)
}
