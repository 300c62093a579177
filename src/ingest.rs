//! Entry points the CLI drives: the long-running aggregation loop and a
//! single ad-hoc fetch.

use std::sync::Arc;

use tokio::sync::watch;

use crate::feed::{FeedChannel, FetchError, Fetcher};
use crate::scheduler::{FeedStore, ItemSink, Scheduler, SchedulerConfig};

/// Run the scheduler until `shutdown` is signalled, then wait for
/// in-flight fetches. Per-feed failures are logged and never end the loop.
pub async fn run_aggregation(
    store: Arc<dyn FeedStore>,
    sink: Arc<dyn ItemSink>,
    fetcher: Fetcher,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
) {
    let mut scheduler = Scheduler::new(store, sink, fetcher, config);
    scheduler.run(shutdown).await;
    tracing::info!("Aggregation stopped");
}

/// Fetch one URL without touching the store.
pub async fn fetch_one(fetcher: &Fetcher, url: &str) -> Result<FeedChannel, FetchError> {
    let channel = fetcher.fetch(url).await?;
    tracing::debug!(url = %url, items = channel.items.len(), "Fetched feed");
    Ok(channel)
}
