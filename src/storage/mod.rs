//! SQLite persistence for users, feeds, follows and posts.
//!
//! [`Database`] is the concrete feed store: it implements
//! [`FeedStore`](crate::scheduler::FeedStore) for the scheduler and
//! [`ItemSink`](crate::scheduler::ItemSink) to persist fetched items.

mod feeds;
mod follows;
mod posts;
mod schema;
mod store;
mod types;
mod users;

pub use schema::Database;
pub use types::{
    now_millis, Feed, FeedFollow, FeedId, FeedWithOwner, Post, StoreError, User, UserId,
};
