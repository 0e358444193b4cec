use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::CoreConfig;

/// Builds the pool without connecting; the first query opens a connection.
pub fn connect_lazy(config: &CoreConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(8))
        .connect_lazy(&config.database_url)
        .context("failed to create lazy pool for the equipment database")
}
