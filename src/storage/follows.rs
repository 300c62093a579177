use super::schema::Database;
use super::types::{now_millis, FeedFollow, FeedId, StoreError, UserId};

impl Database {
    // ========================================================================
    // Follow Operations
    // ========================================================================

    /// Make `user_id` follow `feed_id`. Following twice is a conflict.
    pub async fn follow_feed(
        &self,
        user_id: UserId,
        feed_id: FeedId,
    ) -> Result<FeedFollow, StoreError> {
        let now = now_millis();
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::on_conflict(e, "follow"))?;

        sqlx::query_as(
            r#"
                SELECT ff.id, ff.user_id, ff.feed_id, u.name AS user_name,
                       f.name AS feed_name, f.url AS feed_url
                FROM feed_follows ff
                JOIN users u ON u.id = ff.user_id
                JOIN feeds f ON f.id = ff.feed_id
                WHERE ff.id = ?
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// Feeds followed by `user_id`, oldest follow first.
    pub async fn get_follows_for_user(&self, user_id: UserId) -> Result<Vec<FeedFollow>, StoreError> {
        Ok(sqlx::query_as(
            r#"
                SELECT ff.id, ff.user_id, ff.feed_id, u.name AS user_name,
                       f.name AS feed_name, f.url AS feed_url
                FROM feed_follows ff
                JOIN users u ON u.id = ff.user_id
                JOIN feeds f ON f.id = ff.feed_id
                WHERE ff.user_id = ?
                ORDER BY ff.created_at, ff.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Remove the follow of the feed at `url`. Returns `NotFound` when the
    /// user was not following it.
    pub async fn unfollow_feed(&self, user_id: UserId, url: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM feed_follows
             WHERE user_id = ? AND feed_id = (SELECT id FROM feeds WHERE url = ?)",
        )
        .bind(user_id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("follow"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, StoreError};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_follow_another_users_feed() {
        let db = test_db().await;
        let owner = db.create_user("owner").await.unwrap();
        let reader = db.create_user("reader").await.unwrap();
        let feed = db
            .create_feed("HN", "https://news.ycombinator.com/rss", owner.id)
            .await
            .unwrap();

        let follow = db.follow_feed(reader.id, feed.id).await.unwrap();
        assert_eq!(follow.user_name, "reader");
        assert_eq!(follow.feed_name, "HN");
        assert_eq!(follow.feed_url, "https://news.ycombinator.com/rss");

        let follows = db.get_follows_for_user(reader.id).await.unwrap();
        assert_eq!(follows, vec![follow]);
    }

    #[tokio::test]
    async fn test_follow_twice_is_conflict() {
        let db = test_db().await;
        let owner = db.create_user("owner").await.unwrap();
        let feed = db
            .create_feed("HN", "https://news.ycombinator.com/rss", owner.id)
            .await
            .unwrap();

        let err = db.follow_feed(owner.id, feed.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("follow")), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unfollow() {
        let db = test_db().await;
        let owner = db.create_user("owner").await.unwrap();
        db.create_feed("HN", "https://news.ycombinator.com/rss", owner.id)
            .await
            .unwrap();

        db.unfollow_feed(owner.id, "https://news.ycombinator.com/rss")
            .await
            .unwrap();
        assert!(db.get_follows_for_user(owner.id).await.unwrap().is_empty());

        let err = db
            .unfollow_feed(owner.id, "https://news.ycombinator.com/rss")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
