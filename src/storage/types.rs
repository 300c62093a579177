use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by the feed store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Database is locked by another process")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The requested row does not exist (or no feed is eligible)
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A unique constraint rejected the write
    #[error("{0} already exists")]
    Conflict(&'static str),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

impl StoreError {
    /// Classify a sqlx error, mapping lock contention to [`StoreError::Locked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::Locked;
        }

        StoreError::Other(err)
    }

    /// Map a unique-constraint violation to [`StoreError::Conflict`].
    pub(crate) fn on_conflict(err: sqlx::Error, what: &'static str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(what)
            }
            _ => StoreError::from_sqlx(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

// ============================================================================
// Identifiers and timestamps
// ============================================================================

pub type UserId = i64;
pub type FeedId = i64;

/// Current time as Unix milliseconds, the unit every timestamp column uses.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A feed row. `last_fetched_at` is `None` until the scheduler first
/// reserves the feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: FeedId,
    pub name: String,
    pub url: String,
    pub user_id: UserId,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
}

impl Feed {
    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.last_fetched_at.and_then(from_millis)
    }

    /// Whether the scheduler may claim this feed for a tick whose cutoff is `due_before`.
    pub fn is_due(&self, due_before: DateTime<Utc>) -> bool {
        match self.last_fetched_at {
            None => true,
            Some(at) => at < due_before.timestamp_millis(),
        }
    }
}

/// A feed joined with its owner's name, for listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedWithOwner {
    pub id: FeedId,
    pub name: String,
    pub url: String,
    pub owner_name: String,
    pub created_at: i64,
    pub last_fetched_at: Option<i64>,
}

/// A follow relation joined with the feed and user names.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: UserId,
    pub feed_id: FeedId,
    pub user_name: String,
    pub feed_name: String,
    pub feed_url: String,
}

/// A persisted feed item.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub feed_id: FeedId,
    pub feed_name: String,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: Option<i64>,
    pub created_at: i64,
}

impl Post {
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published_at.and_then(from_millis)
    }
}
