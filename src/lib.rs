//! Feed ingestion and scheduling for the `gator` RSS aggregator.
//!
//! The [`scheduler`] claims due feeds from a [`scheduler::FeedStore`],
//! fetches them with a [`feed::Fetcher`], normalizes their items and hands
//! them to a [`scheduler::ItemSink`]. [`storage::Database`] implements both
//! the store and a sink that persists posts.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod scheduler;
pub mod storage;
pub mod util;
