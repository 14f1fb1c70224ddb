use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser::{self, ParseFeedError};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info};

use crate::feed::{FeedItem, ItemSource};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    Status(StatusCode),

    #[error("malformed feed: {0}")]
    Parse(#[from] ParseFeedError),
}

/// Fetches and parses a single feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_feed(&self, url: &str, source_name: &str) -> Result<Vec<FeedItem>, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Widgetify/1.0 (News Widget)")
            .build()?;

        Ok(Self { client })
    }

    /// Parse a raw RSS/Atom/JSON feed body into items.
    ///
    /// Entries without a publish or update timestamp are skipped; they could
    /// never pass the recency window.
    pub fn parse_items(
        bytes: &[u8],
        feed_url: &str,
        source_name: &str,
    ) -> Result<Vec<FeedItem>, FetchError> {
        let parsed = parser::parse(bytes)?;

        let homepage = Self::homepage_url(&parsed.links).unwrap_or_else(|| feed_url.to_string());
        let source = ItemSource {
            name: source_name.to_string(),
            url: homepage,
        };

        let mut items = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let Some(pub_date) = entry.published.or(entry.updated) else {
                debug!("Skipping undated entry '{}' from {}", title, source_name);
                continue;
            };

            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .filter(|d| !d.trim().is_empty());

            let link = entry.links.first().map(|l| l.href.clone());

            items.push(FeedItem {
                title,
                description,
                source: source.clone(),
                link,
                pub_date,
            });
        }

        Ok(items)
    }

    /// The site a feed belongs to, ignoring `rel="self"` and similar links.
    pub fn homepage_url(links: &[feed_rs::model::Link]) -> Option<String> {
        links
            .iter()
            .find(|l| {
                l.rel
                    .as_deref()
                    .map_or(true, |rel| rel.eq_ignore_ascii_case("alternate"))
            })
            .map(|l| l.href.clone())
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_feed(&self, url: &str, source_name: &str) -> Result<Vec<FeedItem>, FetchError> {
        info!("Fetching feed: {} ({})", source_name, url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        let items = Self::parse_items(&bytes, url, source_name)?;

        debug!("Parsed {} items from '{}'", items.len(), source_name);
        Ok(items)
    }
}
