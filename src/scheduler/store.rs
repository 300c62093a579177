use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::{Feed, FeedId, StoreError};

/// What the scheduler needs from persistence.
///
/// The store owns `last_fetched_at`; the scheduler only changes it through
/// [`mark_fetched`](FeedStore::mark_fetched) or
/// [`claim_next_feed`](FeedStore::claim_next_feed).
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// The eligible feed fetched longest ago, never-fetched feeds first.
    /// `StoreError::NotFound` when no feed is eligible.
    async fn next_feed_to_fetch(&self) -> Result<Feed, StoreError>;

    async fn mark_fetched(&self, feed_id: FeedId, when: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get_feed_by_url(&self, url: &str) -> Result<Feed, StoreError>;

    /// Select the next feed and stamp it as fetched now, unless it was
    /// fetched at or after `due_before`.
    ///
    /// The default runs two statements, so two schedulers sharing a store
    /// could claim the same feed. Stores that can do both in one atomic
    /// step should override it.
    async fn claim_next_feed(&self, due_before: DateTime<Utc>) -> Result<Option<Feed>, StoreError> {
        let mut feed = match self.next_feed_to_fetch().await {
            Ok(feed) => feed,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if !feed.is_due(due_before) {
            return Ok(None);
        }

        let now = Utc::now();
        self.mark_fetched(feed.id, now).await?;
        feed.last_fetched_at = Some(now.timestamp_millis());
        feed.updated_at = now.timestamp_millis();
        Ok(Some(feed))
    }
}
