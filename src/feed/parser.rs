use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Channel metadata plus items, as delivered by the fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RawItem>,
}

/// One feed item before normalization. `pub_date` keeps the feed's own
/// date text so the normalizer can pick the layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: Option<String>,
}

// ============================================================================
// RSS 2.0 wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssChannel {
    title: String,
    link: String,
    description: String,
    #[serde(rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssItem {
    title: String,
    link: String,
    description: String,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

impl From<RssChannel> for FeedChannel {
    fn from(channel: RssChannel) -> Self {
        FeedChannel {
            title: channel.title,
            link: channel.link,
            description: channel.description,
            items: channel
                .items
                .into_iter()
                .map(|item| RawItem {
                    title: item.title,
                    link: item.link,
                    description: item.description,
                    pub_date: item.pub_date,
                })
                .collect(),
        }
    }
}

/// Parse a feed document.
///
/// RSS 2.0 is decoded directly so `pubDate` text survives untouched.
/// Anything the RSS decoder rejects (Atom, RSS 1.0, non-UTF-8 bodies,
/// unusual channel layouts) is handed to `feed-rs`; its dates come back
/// as RFC 3339 strings. Fails only when neither decoder accepts the body.
pub fn parse_channel(bytes: &[u8]) -> Result<FeedChannel> {
    let rss_error = match std::str::from_utf8(bytes) {
        Ok(text) => match quick_xml::de::from_str::<RssDocument>(text) {
            Ok(doc) => return Ok(doc.channel.into()),
            Err(e) => anyhow::anyhow!(e),
        },
        Err(e) => anyhow::anyhow!(e),
    };

    match feed_rs::parser::parse(bytes) {
        Ok(feed) => {
            tracing::debug!(error = %rss_error, "Not plain RSS 2.0, parsed with feed-rs");
            Ok(from_feed_rs(feed))
        }
        Err(_) => Err(rss_error.context("malformed feed document")),
    }
}

fn from_feed_rs(feed: feed_rs::model::Feed) -> FeedChannel {
    let items = feed
        .entries
        .into_iter()
        .map(|entry| RawItem {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default(),
            pub_date: entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()),
        })
        .collect();

    FeedChannel {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: feed
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        items,
    }
}
