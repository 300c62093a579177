use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{Feed, FeedId, StoreError};
use crate::feed::FeedItem;
use crate::scheduler::{FeedStore, ItemSink};

#[async_trait]
impl FeedStore for Database {
    async fn next_feed_to_fetch(&self) -> Result<Feed, StoreError> {
        Database::next_feed_to_fetch(self).await
    }

    async fn mark_fetched(&self, feed_id: FeedId, when: DateTime<Utc>) -> Result<(), StoreError> {
        Database::mark_fetched(self, feed_id, when).await
    }

    async fn get_feed_by_url(&self, url: &str) -> Result<Feed, StoreError> {
        Database::get_feed_by_url(self, url).await
    }

    // Single UPDATE ... RETURNING instead of the trait's select-then-mark
    async fn claim_next_feed(&self, due_before: DateTime<Utc>) -> Result<Option<Feed>, StoreError> {
        Database::claim_next_feed(self, due_before).await
    }
}

#[async_trait]
impl ItemSink for Database {
    async fn accept(&self, feed: &Feed, items: Vec<FeedItem>) -> anyhow::Result<usize> {
        let inserted = self.insert_posts(feed.id, &items).await?;
        tracing::debug!(
            feed_id = feed.id,
            received = items.len(),
            inserted = inserted,
            "Stored posts"
        );
        Ok(inserted)
    }
}
