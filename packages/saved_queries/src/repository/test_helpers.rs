use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::{FileConfig, StoreConfig};
use crate::db::Database;

/// Fresh in-memory SQLite pool with all migrations applied (~1ms).
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    pool
}

/// Isolated database handle with default listing limits and deadlines.
pub async fn test_database() -> Database {
    let config = StoreConfig::from_file(Path::new(":memory:"), &FileConfig::default());
    Database::from_pool(test_pool().await, config)
}
