use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::StationConfig;

pub fn connect_lazy(config: &StationConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(8))
        .connect_lazy(&config.database_url)
        .context("Failed to create lazy database pool")
}
