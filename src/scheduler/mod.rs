//! The aggregation loop.
//!
//! Every tick the [`Scheduler`] claims the feeds that are due, oldest
//! first, and hands each one to a worker task. A claim stamps the feed's
//! `last_fetched_at` before any network traffic, so a slow or failing feed
//! moves to the back of the queue instead of blocking the others.
//!
//! Concurrency is bounded by a semaphore with `worker_count` permits. A
//! permit is held for the whole fetch, so a fetch that outlives its tick
//! still counts against the next one. An in-flight set keeps any feed from
//! being fetched by two workers at once.

mod inflight;
mod sink;
mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::feed::{normalize, FeedItem, FetchError, Fetcher};
use crate::storage::{Feed, FeedId};
use inflight::{InFlightGuard, InFlightSet};

pub use sink::{IngestedBatch, ItemSink, LogSink};
pub use store::FeedStore;

/// Shorter intervals are raised to this; `tokio::time::interval` rejects zero.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub tick_interval: Duration,
    /// Maximum concurrent fetches
    pub worker_count: usize,
    /// How long after a fetch a feed becomes due again. Zero means any
    /// feed not already claimed during the current tick.
    pub refetch_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            worker_count: 4,
            refetch_after: Duration::ZERO,
        }
    }
}

/// Why one feed's fetch produced nothing.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("sink rejected items: {0}")]
    Sink(String),
}

/// Outcome of one fetch task. `result` holds the number of items the sink accepted.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_id: FeedId,
    pub url: String,
    pub result: Result<usize, IngestError>,
}

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Feeds claimed and handed to workers, in claim order
    pub claimed: Vec<FeedId>,
    /// Claiming stopped early because the store failed
    pub store_error: bool,
}

pub struct Scheduler {
    store: Arc<dyn FeedStore>,
    sink: Arc<dyn ItemSink>,
    fetcher: Fetcher,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    in_flight: InFlightSet,
    tasks: JoinSet<FetchResult>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn FeedStore>,
        sink: Arc<dyn ItemSink>,
        fetcher: Fetcher,
        config: SchedulerConfig,
    ) -> Self {
        let workers = config.worker_count.max(1);
        Self {
            store,
            sink,
            fetcher,
            config: SchedulerConfig {
                tick_interval: config.tick_interval.max(MIN_TICK_INTERVAL),
                worker_count: workers,
                ..config
            },
            permits: Arc::new(Semaphore::new(workers)),
            in_flight: InFlightSet::default(),
            tasks: JoinSet::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Claim due feeds while worker permits are free and start fetching them.
    ///
    /// Returns once the fetches are dispatched; it does not wait for them.
    pub async fn tick(&mut self) -> TickReport {
        let due_before = self.due_before(Utc::now());
        let mut report = TickReport::default();

        loop {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };

            let feed = match self.store.claim_next_feed(due_before).await {
                Ok(Some(feed)) => feed,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim next feed, skipping tick");
                    report.store_error = true;
                    break;
                }
            };

            let Some(guard) = InFlightGuard::acquire(&self.in_flight, feed.id) else {
                tracing::debug!(feed_id = feed.id, url = %feed.url, "Feed already being fetched");
                continue;
            };

            report.claimed.push(feed.id);
            self.spawn_fetch(feed, permit, guard);
        }

        if report.claimed.is_empty() && !report.store_error {
            tracing::debug!("No feeds due");
        }
        report
    }

    /// Run a single tick and wait for every fetch it started.
    pub async fn run_once(&mut self) -> (TickReport, Vec<FetchResult>) {
        let report = self.tick().await;
        let results = self.drain().await;
        (report, results)
    }

    /// Tick on the configured interval until `shutdown` turns true or its
    /// sender is dropped, then wait for in-flight fetches.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.config.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            every = ?self.config.tick_interval,
            workers = self.config.worker_count,
            "Collecting feeds"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    let report = self.tick().await;
                    tracing::debug!(
                        claimed = report.claimed.len(),
                        in_flight = self.tasks.len(),
                        "Tick dispatched"
                    );
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        log_join_error(e);
                    }
                }
            }
        }

        tracing::info!(in_flight = self.tasks.len(), "Stopping, waiting for running fetches");
        self.drain().await;
    }

    /// Wait for all running fetches and collect their results.
    pub async fn drain(&mut self) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => log_join_error(e),
            }
        }
        results
    }

    fn due_before(&self, tick_start: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.refetch_after)
            .ok()
            .and_then(|delay| tick_start.checked_sub_signed(delay))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn spawn_fetch(&mut self, feed: Feed, permit: OwnedSemaphorePermit, guard: InFlightGuard) {
        let fetcher = self.fetcher.clone();
        let sink = Arc::clone(&self.sink);

        tracing::debug!(feed_id = feed.id, url = %feed.url, "Fetching feed");

        self.tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;

            let result = ingest_feed(&fetcher, sink.as_ref(), &feed).await;
            match &result {
                Ok(count) => {
                    tracing::info!(feed_id = feed.id, feed = %feed.name, items = count, "Fetched feed");
                }
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed fetch failed");
                }
            }

            FetchResult {
                feed_id: feed.id,
                url: feed.url,
                result,
            }
        });
    }
}

/// Fetch one feed, normalize its items and hand them to the sink.
async fn ingest_feed(
    fetcher: &Fetcher,
    sink: &dyn ItemSink,
    feed: &Feed,
) -> Result<usize, IngestError> {
    let channel = fetcher.fetch(&feed.url).await?;
    let items: Vec<FeedItem> = channel.items.iter().map(normalize).collect();

    sink.accept(feed, items)
        .await
        .map_err(|e| IngestError::Sink(format!("{e:#}")))
}

fn log_join_error(e: JoinError) {
    if e.is_panic() {
        tracing::error!(error = %e, "Fetch task panicked");
    } else {
        tracing::warn!(error = %e, "Fetch task cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetcherConfig;
    use crate::storage::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// In-memory store that only implements the required methods, so the
    /// default `claim_next_feed` is exercised.
    #[derive(Default)]
    struct FakeStore {
        feeds: Mutex<Vec<Feed>>,
        failing: AtomicBool,
        marks: AtomicUsize,
    }

    impl FakeStore {
        fn with_feeds(urls: &[String]) -> Self {
            let feeds = urls
                .iter()
                .enumerate()
                .map(|(i, url)| Feed {
                    id: i as i64 + 1,
                    name: format!("Feed {}", i + 1),
                    url: url.clone(),
                    user_id: 1,
                    created_at: i as i64,
                    updated_at: i as i64,
                    last_fetched_at: None,
                })
                .collect();
            Self {
                feeds: Mutex::new(feeds),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl FeedStore for FakeStore {
        async fn next_feed_to_fetch(&self) -> Result<Feed, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Locked);
            }
            let feeds = self.feeds.lock().unwrap();
            feeds
                .iter()
                .min_by_key(|f| (f.last_fetched_at.is_some(), f.last_fetched_at, f.created_at, f.id))
                .cloned()
                .ok_or(StoreError::NotFound("feed"))
        }

        async fn mark_fetched(&self, feed_id: FeedId, when: DateTime<Utc>) -> Result<(), StoreError> {
            self.marks.fetch_add(1, Ordering::SeqCst);
            let mut feeds = self.feeds.lock().unwrap();
            let feed = feeds
                .iter_mut()
                .find(|f| f.id == feed_id)
                .ok_or(StoreError::NotFound("feed"))?;
            feed.last_fetched_at = Some(when.timestamp_millis());
            Ok(())
        }

        async fn get_feed_by_url(&self, url: &str) -> Result<Feed, StoreError> {
            let feeds = self.feeds.lock().unwrap();
            feeds
                .iter()
                .find(|f| f.url == url)
                .cloned()
                .ok_or(StoreError::NotFound("feed"))
        }
    }

    const RSS: &str = r#"<rss version="2.0"><channel><title>T</title>
        <item><title>First &amp;amp; best</title><link>https://example.com/1</link>
        <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate></item>
        <item><title>Second</title><link>https://example.com/2</link>
        <pubDate>not a date</pubDate></item>
    </channel></rss>"#;

    async fn rss_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;
        server
    }

    fn scheduler(
        store: Arc<FakeStore>,
        workers: usize,
    ) -> (Scheduler, mpsc::UnboundedReceiver<IngestedBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fetcher = Fetcher::new(&FetcherConfig {
            timeout: Duration::from_secs(2),
            ..FetcherConfig::default()
        })
        .unwrap();
        let config = SchedulerConfig {
            tick_interval: Duration::from_millis(20),
            worker_count: workers,
            refetch_after: Duration::from_secs(3600),
        };
        (Scheduler::new(store, Arc::new(tx), fetcher, config), rx)
    }

    #[tokio::test]
    async fn test_tick_normalizes_items_into_sink() {
        let server = rss_server().await;
        let store = Arc::new(FakeStore::with_feeds(&[format!("{}/a", server.uri())]));
        let (mut scheduler, mut rx) = scheduler(Arc::clone(&store), 1);

        let (report, results) = scheduler.run_once().await;
        assert_eq!(report.claimed, vec![1]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.as_ref().unwrap(), &2);

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.feed_id, 1);
        assert_eq!(batch.items[0].title, "First & best");
        assert!(batch.items[0].published_at.is_some());
        assert_eq!(batch.items[1].title, "Second");
        assert_eq!(batch.items[1].published_at, None);
    }

    #[tokio::test]
    async fn test_tick_claims_up_to_worker_count_oldest_first() {
        let server = rss_server().await;
        let urls: Vec<String> = (0..3).map(|i| format!("{}/{i}", server.uri())).collect();
        let store = Arc::new(FakeStore::with_feeds(&urls));
        let (mut scheduler, _rx) = scheduler(Arc::clone(&store), 2);

        let (first, _) = scheduler.run_once().await;
        assert_eq!(first.claimed, vec![1, 2]);

        let (second, _) = scheduler.run_once().await;
        assert_eq!(second.claimed, vec![3]);

        let (third, results) = scheduler.run_once().await;
        assert!(third.claimed.is_empty());
        assert!(results.is_empty());
        assert_eq!(store.marks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_store_error_skips_tick() {
        let store = Arc::new(FakeStore::with_feeds(&["https://example.com/rss".to_string()]));
        store.failing.store(true, Ordering::SeqCst);
        let (mut scheduler, mut rx) = scheduler(Arc::clone(&store), 2);

        let (report, results) = scheduler.run_once().await;
        assert!(report.store_error);
        assert!(report.claimed.is_empty());
        assert!(results.is_empty());
        assert!(rx.try_recv().is_err());

        store.failing.store(false, Ordering::SeqCst);
        let report = scheduler.tick().await;
        assert!(!report.store_error);
        assert_eq!(report.claimed, vec![1]);
    }

    #[tokio::test]
    async fn test_empty_store_is_noop() {
        let store = Arc::new(FakeStore::default());
        let (mut scheduler, _rx) = scheduler(Arc::clone(&store), 4);

        let (report, results) = scheduler.run_once().await;
        assert_eq!(report, TickReport::default());
        assert!(results.is_empty());
        assert_eq!(store.marks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_busy_permits_limit_next_tick() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS)
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let urls: Vec<String> = (0..3).map(|i| format!("{}/{i}", server.uri())).collect();
        let store = Arc::new(FakeStore::with_feeds(&urls));
        let (mut scheduler, _rx) = scheduler(Arc::clone(&store), 1);

        assert_eq!(scheduler.tick().await.claimed, vec![1]);
        // the only permit is still held by the slow fetch
        assert!(scheduler.tick().await.claimed.is_empty());
        assert_eq!(scheduler.in_flight(), 1);

        let results = scheduler.drain().await;
        assert_eq!(results.len(), 1);
        assert_eq!(scheduler.tick().await.claimed, vec![2]);
        scheduler.drain().await;
    }

    #[tokio::test]
    async fn test_default_claim_respects_due_cutoff() {
        let store = FakeStore::with_feeds(&["https://example.com/rss".to_string()]);
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        store.mark_fetched(1, hour_ago).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(2);
        assert!(store.claim_next_feed(cutoff).await.unwrap().is_none());

        let claimed = store.claim_next_feed(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, 1);
        assert!(claimed.last_fetched().unwrap() > hour_ago);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = rss_server().await;
        let store = Arc::new(FakeStore::with_feeds(&[format!("{}/a", server.uri())]));
        let (mut scheduler, mut rx) = scheduler(Arc::clone(&store), 2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
            scheduler
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        let scheduler = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(scheduler.in_flight(), 0);
        // refetch_after keeps the single feed from being fetched twice
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_zero_tick_interval_is_raised() {
        let server = rss_server().await;
        let store = Arc::new(FakeStore::with_feeds(&[format!("{}/a", server.uri())]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = SchedulerConfig {
            tick_interval: Duration::ZERO,
            worker_count: 0,
            refetch_after: Duration::from_secs(3600),
        };
        let mut scheduler = Scheduler::new(
            store,
            Arc::new(tx),
            Fetcher::new(&FetcherConfig::default()).unwrap(),
            config,
        );
        assert_eq!(scheduler.config().tick_interval, MIN_TICK_INTERVAL);
        assert_eq!(scheduler.config().worker_count, 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().feed_id, 1);
    }
}
