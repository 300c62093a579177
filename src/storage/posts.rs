use sha2::{Digest, Sha256};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{now_millis, FeedId, Post, StoreError, UserId};
use crate::feed::FeedItem;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Store fetched items as posts, ignoring ones already stored for the feed.
    ///
    /// Returns the number of newly inserted posts.
    pub async fn insert_posts(&self, feed_id: FeedId, items: &[FeedItem]) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO posts \
                 (feed_id, guid, title, url, description, published_at, created_at, updated_at) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(feed_id)
                    .push_bind(post_guid(item))
                    .push_bind(&item.title)
                    .push_bind(&item.link)
                    .push_bind(&item.description)
                    .push_bind(item.published_at.map(|at| at.timestamp_millis()))
                    .push_bind(now)
                    .push_bind(now);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Latest posts across the feeds `user_id` follows, newest first.
    pub async fn get_posts_for_user(&self, user_id: UserId, limit: i64) -> Result<Vec<Post>, StoreError> {
        Ok(sqlx::query_as(
            r#"
                SELECT p.id, p.feed_id, f.name AS feed_name, p.guid, p.title, p.url,
                       p.description, p.published_at, p.created_at
                FROM posts p
                JOIN feeds f ON f.id = p.feed_id
                JOIN feed_follows ff ON ff.feed_id = p.feed_id
                WHERE ff.user_id = ?
                ORDER BY COALESCE(p.published_at, p.created_at) DESC, p.id DESC
                LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

/// Stable identity of an item within its feed: the link when present,
/// otherwise a digest of the visible fields.
fn post_guid(item: &FeedItem) -> String {
    if !item.link.is_empty() {
        return item.link.clone();
    }

    let input = format!(
        "{}|{}|{}",
        item.title,
        item.description,
        item.published_at
            .map(|at| at.timestamp_millis().to_string())
            .unwrap_or_default()
    );
    format!("sha256:{:x}", Sha256::digest(input.as_bytes()))
}
