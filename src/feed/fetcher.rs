use std::borrow::Cow;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use super::parser::{parse_channel, FeedChannel};
use crate::util::{parse_feed_url, UrlValidationError};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// A failed fetch of one feed URL.
#[derive(Debug, Error)]
#[error("fetching {url}: {cause}")]
pub struct FetchError {
    pub url: String,
    #[source]
    pub cause: FetchFailure,
}

/// Why a fetch failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// The feed URL could not be turned into a request
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// DNS, connection, TLS or body read failure
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    /// Non-2xx response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("response too large")]
    ResponseTooLarge,
    /// Body is neither RSS nor anything feed-rs understands
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchFailure::Timeout
        } else {
            FetchFailure::Transport(e)
        }
    }
}

/// HTTP settings for feed requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_body_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: default_user_agent(),
            max_body_bytes: MAX_FEED_SIZE,
        }
    }
}

pub fn default_user_agent() -> String {
    concat!("gator/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Retrieves and parses feeds over HTTP.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            timeout: config.timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetch `url` and parse it into a channel.
    ///
    /// Channel and item titles and descriptions come back entity-decoded.
    /// Item publication dates are left as the feed wrote them.
    ///
    /// # Errors
    ///
    /// - [`FetchFailure::InvalidUrl`] - not an http(s) URL
    /// - [`FetchFailure::Transport`] - connection, TLS or body read errors
    /// - [`FetchFailure::Timeout`] - the whole exchange exceeded the timeout
    /// - [`FetchFailure::HttpStatus`] - non-2xx response
    /// - [`FetchFailure::ResponseTooLarge`] - body over the size cap
    /// - [`FetchFailure::Parse`] - body is not a feed
    pub async fn fetch(&self, url: &str) -> Result<FeedChannel, FetchError> {
        let result = match tokio::time::timeout(self.timeout, self.fetch_inner(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::Timeout),
        };

        result.map_err(|cause| FetchError {
            url: url.to_string(),
            cause,
        })
    }

    async fn fetch_inner(&self, url: &str) -> Result<FeedChannel, FetchFailure> {
        let url = parse_feed_url(url)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_body_bytes).await?;
        let channel = parse_channel(&bytes).map_err(|e| FetchFailure::Parse(format!("{e:#}")))?;

        Ok(decode_entities(channel))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchFailure> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(FetchFailure::ResponseTooLarge);
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchFailure::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

fn decode(s: String) -> String {
    match html_escape::decode_html_entities(&s) {
        Cow::Borrowed(_) => s,
        Cow::Owned(decoded) => decoded,
    }
}

fn decode_entities(mut channel: FeedChannel) -> FeedChannel {
    channel.title = decode(channel.title);
    channel.description = decode(channel.description);
    for item in &mut channel.items {
        item.title = decode(std::mem::take(&mut item.title));
        item.description = decode(std::mem::take(&mut item.description));
    }
    channel
}
