//! SQLite connection pool setup.

use crate::error::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL (e.g. `sqlite:veritas.db?mode=rwc` or `sqlite::memory:`)
    pub url: String,
    pub max_connections: u32,
    pub wal_mode: bool,
    pub foreign_keys: bool,
    pub busy_timeout_secs: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:veritas.db?mode=rwc".to_string(),
            max_connections: 5,
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_secs: 30,
        }
    }
}

impl SqliteConfig {
    /// Configuration for an in-memory database (tests).
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            foreign_keys: true,
            busy_timeout_secs: 5,
        }
    }
}

/// Open a pool, apply pragmas, and run migrations.
///
/// `journal_mode=WAL` lets readers proceed while a writer holds the
/// database; it does not remove the need for `BEGIN IMMEDIATE` around the
/// event-admission pipeline, since WAL still serializes writers.
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool, StorageError> {
    let mut options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    if config.foreign_keys {
        options = options.pragma("foreign_keys", "ON");
    }
    options = options.pragma("busy_timeout", config.busy_timeout_secs.to_string());
    if config.wal_mode {
        options = options.pragma("journal_mode", "WAL");
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    info!(url = %config.url, wal = config.wal_mode, "connected to sqlite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Internal(format!("migration failed: {e}")))?;

    Ok(pool)
}
