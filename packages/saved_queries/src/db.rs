use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

use crate::config::StoreConfig;
use crate::repository::{SavedQueryStore, SharingLedger, UserDirectory};

/// Owns the connection pool. Acquire once at startup and hand out the stores.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
    config: StoreConfig,
}

impl Database {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.db_path.display());

        let options = SqliteConnectOptions::from_str(&config.db_url())
            .with_context(|| format!("Invalid database url: {}", config.db_url()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .pragma("cache_size", "-64000") // 64MB cache
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.db_url()))?;

        info!("Running database migrations...");
        run_migrations(&pool).await?;

        info!("Database initialized successfully");

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    pub(crate) fn from_pool(pool: SqlitePool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    pub fn saved_queries(&self) -> SavedQueryStore {
        SavedQueryStore::new(self.pool.clone())
            .with_listing(self.config.listing.clone())
            .with_timeout(self.config.operation_timeout)
    }

    pub fn sharing(&self) -> SharingLedger {
        SharingLedger::new(self.pool.clone()).with_timeout(self.config.operation_timeout)
    }

    pub fn users(&self) -> UserDirectory {
        UserDirectory::new(self.pool.clone()).with_timeout(self.config.operation_timeout)
    }

    pub async fn stats(&self) -> Result<DbStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM saved_queries) as query_count,
                (SELECT COUNT(*) FROM saved_queries_permissions) as grant_count,
                (SELECT COUNT(*) FROM users) as user_count
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DbStats {
            saved_queries: row.try_get::<i64, _>("query_count")? as u64,
            grants: row.try_get::<i64, _>("grant_count")? as u64,
            users: row.try_get::<i64, _>("user_count")? as u64,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub saved_queries: u64,
    pub grants: u64,
    pub users: u64,
}

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .context("Failed to read schema version")?;

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}. Please upgrade the application.",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version == SCHEMA_VERSION {
        info!(
            "Database schema is up to date (version {})",
            current_version
        );
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            principal_name TEXT UNIQUE NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Owner is not a foreign key: queries may belong to identities managed elsewhere.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS saved_queries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            query TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_saved_queries_user_name ON saved_queries(user_id, name)",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_saved_queries_user_id ON saved_queries(user_id)")
        .execute(&mut *tx)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_saved_queries_name ON saved_queries(name)")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS saved_queries_permissions (
            query_id INTEGER NOT NULL REFERENCES saved_queries(id) ON DELETE CASCADE,
            shared_to_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            PRIMARY KEY (query_id, shared_to_user_id)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sq_permissions_user ON saved_queries_permissions(shared_to_user_id)",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT OR REPLACE INTO schema_version (version, description) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind("Saved queries, sharing permissions, users")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("Schema upgraded to version {}", SCHEMA_VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::repository::test_helpers;

    #[tokio::test]
    async fn run_migrations_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        // Run migrations twice, should not error
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn schema_version_recorded() {
        let pool = test_helpers::test_pool().await;
        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn newer_schema_is_refused() {
        let pool = test_helpers::test_pool().await;
        sqlx::query("INSERT INTO schema_version (version, description) VALUES (?, 'future')")
            .bind(SCHEMA_VERSION + 1)
            .execute(&pool)
            .await
            .unwrap();
        let err = run_migrations(&pool).await.unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[tokio::test]
    async fn unreadable_schema_version_is_an_error() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        // Reading MAX(version) from this view overflows at query time
        sqlx::query(
            "CREATE VIEW schema_version(version) AS SELECT abs(-9223372036854775807 - 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = run_migrations(&pool).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read schema version"));
    }

    #[tokio::test]
    async fn all_tables_exist_after_migration() {
        let pool = test_helpers::test_pool().await;
        for table in ["users", "saved_queries", "saved_queries_permissions"] {
            let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count.0, 0, "Table {} should exist and be empty", table);
        }
    }

    #[tokio::test]
    async fn stats_count_rows() {
        let db = test_helpers::test_database().await;
        let owner = uuid::Uuid::new_v4();
        let user = db.users().create("alice@example.com").await.unwrap();
        let q = db
            .saved_queries()
            .create(owner, "q1", "", "MATCH (n) RETURN n")
            .await
            .unwrap();
        db.sharing().grant(q.id, user.id).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.saved_queries, 1);
        assert_eq!(stats.grants, 1);
        assert_eq!(stats.users, 1);
    }

    #[tokio::test]
    async fn connect_creates_file_database() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig::from_file(tmp.path(), &FileConfig::default());
        let db = Database::connect(&config).await.unwrap();
        assert!(config.db_path.exists());

        let created = db
            .saved_queries()
            .create(uuid::Uuid::new_v4(), "persisted", "", "RETURN 1")
            .await
            .unwrap();
        let fetched = db.saved_queries().get(created.id).await.unwrap();
        assert_eq!(fetched.name, "persisted");
        db.close().await;
    }
}
