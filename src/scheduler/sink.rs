use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::feed::FeedItem;
use crate::storage::{Feed, FeedId};

/// Receives the normalized items of each successful fetch.
///
/// Returns how many items were accepted. An error fails that feed's
/// fetch for the tick and nothing else.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn accept(&self, feed: &Feed, items: Vec<FeedItem>) -> anyhow::Result<usize>;
}

/// Logs item titles and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ItemSink for LogSink {
    async fn accept(&self, feed: &Feed, items: Vec<FeedItem>) -> anyhow::Result<usize> {
        for item in &items {
            tracing::info!(feed = %feed.name, title = %item.title, "Found post");
        }
        Ok(items.len())
    }
}

/// One fetch's worth of items, as sent over a channel sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedBatch {
    pub feed_id: FeedId,
    pub feed_name: String,
    pub items: Vec<FeedItem>,
}

#[async_trait]
impl ItemSink for mpsc::UnboundedSender<IngestedBatch> {
    async fn accept(&self, feed: &Feed, items: Vec<FeedItem>) -> anyhow::Result<usize> {
        let count = items.len();
        self.send(IngestedBatch {
            feed_id: feed.id,
            feed_name: feed.name.clone(),
            items,
        })
        .map_err(|_| anyhow!("batch receiver dropped"))?;
        Ok(count)
    }
}
