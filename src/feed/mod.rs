//! Retrieving feeds and turning their items into posts.
//!
//! - `fetcher` - HTTP retrieval with a timeout, size cap and user agent
//! - `parser` - RSS 2.0 decoding with a `feed-rs` fallback for other formats
//! - `normalize` - entity decoding, trimming and publication date parsing

mod fetcher;
mod normalize;
mod parser;

pub use fetcher::{default_user_agent, FetchError, FetchFailure, Fetcher, FetcherConfig};
pub use normalize::{normalize, parse_pub_date, DateParseError, FeedItem};
pub use parser::{parse_channel, FeedChannel, RawItem};
