// src/db.rs
// Database pool configuration

use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::CONFIG;

/// Create the SQLite connection pool backing the session and lookup stores.
///
/// SQLite is single-writer but supports multiple readers, so the pool stays
/// small; connections are recycled periodically.
pub async fn create_pool() -> Result<SqlitePool> {
    create_pool_at(&CONFIG.database_url).await
}

pub async fn create_pool_at(database_url: &str) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(CONFIG.sqlite_max_connections as u32)
        .acquire_timeout(Duration::from_secs(10))
        .max_lifetime(Duration::from_secs(1800))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))
}
