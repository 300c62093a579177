use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{now_millis, Feed, FeedId, FeedWithOwner, StoreError, UserId};

const FEED_COLUMNS: &str = "id, name, url, user_id, created_at, updated_at, last_fetched_at";

/// Eligibility filter shared by selection queries: a feed is scheduled only
/// while somebody follows it.
const ELIGIBLE: &str = "EXISTS (SELECT 1 FROM feed_follows ff WHERE ff.feed_id = feeds.id)";

/// Selection order: never fetched first, then oldest fetch, then creation order.
const SCHEDULE_ORDER: &str = "last_fetched_at ASC NULLS FIRST, created_at ASC, id ASC";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed owned by `user_id` and make the owner follow it.
    ///
    /// Both rows are written in one transaction. A duplicate URL fails with
    /// [`StoreError::Conflict`].
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: UserId,
    ) -> Result<Feed, StoreError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let feed: Feed = sqlx::query_as(&format!(
            "INSERT INTO feeds (name, url, user_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        ))
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::on_conflict(e, "feed"))?;

        sqlx::query(
            "INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(feed.id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(feed)
    }

    /// All feeds with their owner's name, in creation order.
    pub async fn get_feeds(&self) -> Result<Vec<FeedWithOwner>, StoreError> {
        Ok(sqlx::query_as(
            r#"
                SELECT f.id, f.name, f.url, u.name AS owner_name, f.created_at, f.last_fetched_at
                FROM feeds f
                JOIN users u ON u.id = f.user_id
                ORDER BY f.created_at, f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_feed(&self, id: FeedId) -> Result<Feed, StoreError> {
        sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("feed"))
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Feed, StoreError> {
        sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("feed"))
    }

    // ========================================================================
    // Scheduling Operations
    // ========================================================================

    /// The eligible feed the scheduler should fetch next.
    ///
    /// Fails with [`StoreError::NotFound`] when no feed is followed.
    pub async fn next_feed_to_fetch(&self) -> Result<Feed, StoreError> {
        sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE {ELIGIBLE} ORDER BY {SCHEDULE_ORDER} LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("feed"))
    }

    /// Stamp a single feed's `last_fetched_at`.
    pub async fn mark_fetched(&self, feed_id: FeedId, when: DateTime<Utc>) -> Result<(), StoreError> {
        let when = when.timestamp_millis();
        let result = sqlx::query("UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?")
            .bind(when)
            .bind(when)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("feed"));
        }
        Ok(())
    }

    /// Select and reserve the next due feed in one statement.
    ///
    /// A feed is due when it was never fetched or last fetched before
    /// `due_before`. The chosen row is stamped with the current time and
    /// returned with that stamp, so a concurrent caller cannot select it
    /// again. Returns `None` when nothing is due.
    pub async fn claim_next_feed(
        &self,
        due_before: DateTime<Utc>,
    ) -> Result<Option<Feed>, StoreError> {
        let now = now_millis();
        Ok(sqlx::query_as(&format!(
            r#"
                UPDATE feeds SET last_fetched_at = ?1, updated_at = ?1
                WHERE id = (
                    SELECT id FROM feeds
                    WHERE {ELIGIBLE}
                      AND (last_fetched_at IS NULL OR last_fetched_at < ?2)
                    ORDER BY {SCHEDULE_ORDER}
                    LIMIT 1
                )
                RETURNING {FEED_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(due_before.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?)
    }
}
