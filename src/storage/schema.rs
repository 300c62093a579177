use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process holds the database
    /// lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Migration` if the schema could not be applied.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the database file user-only
        #[cfg(unix)]
        if !in_memory {
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                use std::os::unix::fs::OpenOptionsExt;
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // If creation fails, SQLite will report the error at connect_with.
            }
        }

        // busy_timeout=5000: concurrent fetch workers write posts while the
        // scheduler reserves feeds; SQLite waits up to 5s for the write lock.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // Shared-cache in-memory databases report SQLITE_LOCKED instead of
        // waiting, so tests get a single connection.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match e.downcast::<sqlx::Error>() {
            Ok(sqlx_err) => match StoreError::from_sqlx(sqlx_err) {
                StoreError::Locked => StoreError::Locked,
                other => StoreError::Migration(other.to_string()),
            },
            Err(e) => StoreError::Migration(e.to_string()),
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_fetched_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(user_id, feed_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                description TEXT NOT NULL,
                published_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Scheduler selection order: never-fetched first, then oldest, then creation order
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_schedule ON feeds(last_fetched_at, created_at, id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_follows_feed ON feed_follows(feed_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_feed_published ON posts(feed_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
