//! The news widget service.
//!
//! Owns the persisted widget state (feed list and per-feed cache), runs
//! aggregation rounds against it and publishes the merged snapshot the
//! widget renders. Persistence is best-effort on the refresh path.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::aggregator::{aggregate, SourceReport};
use crate::feed::{sort_newest_first, FeedCache, FeedItem, FeedSource};
use crate::fetcher::FeedFetcher;
use crate::store::{read_json, write_json, KeyValueStore, StorageError};

pub const STATE_KEY: &str = "rss_news_state";
pub const ITEMS_KEY: &str = "rss_news_items";

/// Widget state as persisted under [`STATE_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RssNewsState {
    #[serde(default)]
    pub custom_feeds: Vec<FeedSource>,
    #[serde(default)]
    pub last_fetched_items: FeedCache,
}

/// The merged list currently shown by the widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsSnapshot {
    pub items: Vec<FeedItem>,
    pub updated_at: Option<DateTime<Utc>>,
    /// True while showing items restored from storage rather than a
    /// completed refresh.
    #[serde(default)]
    pub is_cached: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    #[serde(flatten)]
    pub source: FeedSource,
    pub cached_items: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum FeedEditError {
    #[error("feed '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct NewsService {
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn KeyValueStore>,
    window: Duration,
    refreshing: RwLock<bool>,
    snapshot: RwLock<NewsSnapshot>,
    reports: RwLock<HashMap<String, SourceReport>>,
    // Serializes read-modify-write of the persisted state
    state_lock: Mutex<()>,
}

impl NewsService {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<dyn KeyValueStore>,
        window: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            window,
            refreshing: RwLock::new(false),
            snapshot: RwLock::new(NewsSnapshot::default()),
            reports: RwLock::new(HashMap::new()),
            state_lock: Mutex::new(()),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    pub async fn snapshot(&self) -> NewsSnapshot {
        self.snapshot.read().await.clone()
    }

    async fn load_state(&self) -> Result<RssNewsState, StorageError> {
        Ok(read_json(self.store.as_ref(), STATE_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save_state(&self, state: &RssNewsState) -> Result<(), StorageError> {
        write_json(self.store.as_ref(), STATE_KEY, state).await
    }

    /// Add configured feeds whose id is not stored yet.
    pub async fn seed_feeds(&self, feeds: &[FeedSource]) -> Result<(), StorageError> {
        let _guard = self.state_lock.lock().await;
        let mut state = self.load_state().await?;

        let mut added = 0;
        for feed in feeds {
            if !state.custom_feeds.iter().any(|f| f.id == feed.id) {
                state.custom_feeds.push(feed.clone());
                added += 1;
            }
        }

        if added > 0 {
            self.save_state(&state).await?;
            info!("Seeded {} feeds from configuration", added);
        }
        Ok(())
    }

    /// Publish whatever was stored by the previous run, before any network I/O.
    pub async fn hydrate(&self) {
        let stored: Option<NewsSnapshot> = match read_json(self.store.as_ref(), ITEMS_KEY).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to read stored news snapshot: {}", e);
                None
            }
        };

        let snapshot = match stored {
            Some(snapshot) if !snapshot.items.is_empty() => snapshot,
            _ => {
                let state = self.load_state().await.unwrap_or_else(|e| {
                    warn!("Failed to read stored news state: {}", e);
                    RssNewsState::default()
                });
                // Cached items of disabled feeds are not shown
                let mut items = if state.custom_feeds.iter().any(|f| f.enabled) {
                    state.last_fetched_items.flatten()
                } else {
                    Vec::new()
                };
                sort_newest_first(&mut items);
                NewsSnapshot {
                    items,
                    updated_at: None,
                    is_cached: true,
                }
            }
        };

        info!("Restored {} cached news items", snapshot.items.len());
        *self.snapshot.write().await = NewsSnapshot {
            is_cached: true,
            ..snapshot
        };
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        // Check if already refreshing
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(());
            }
            *refreshing = true;
        }

        let result = self.do_refresh().await;

        // Clear refreshing flag
        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result
    }

    async fn do_refresh(&self) -> anyhow::Result<()> {
        // An unreadable state says nothing about the feeds; keep the current list
        let state = self
            .load_state()
            .await
            .context("failed to read news state, keeping current news list")?;

        if !state.custom_feeds.iter().any(|f| f.enabled) {
            info!("No enabled feeds, clearing news list");
            self.reports.write().await.clear();
            self.publish(NewsSnapshot {
                items: Vec::new(),
                updated_at: Some(Utc::now()),
                is_cached: false,
            })
            .await;
            return Ok(());
        }

        let now = Utc::now();
        let aggregation = aggregate(
            self.fetcher.as_ref(),
            &state.custom_feeds,
            &state.last_fetched_items,
            now,
            self.window,
        )
        .await?;

        info!(
            "Aggregated {} items from {} feeds",
            aggregation.items.len(),
            aggregation.reports.len()
        );

        {
            let _guard = self.state_lock.lock().await;
            // Feeds may have been edited while fetching; commit onto the latest list
            match self.load_state().await {
                Ok(mut latest) => {
                    let mut cache = aggregation.cache;
                    cache.retain(|id| latest.custom_feeds.iter().any(|f| f.id == id));
                    latest.last_fetched_items = cache;

                    if let Err(e) = self.save_state(&latest).await {
                        error!("Failed to persist news state: {}", e);
                    }
                }
                Err(e) => error!("Failed to re-read news state, cache not persisted: {}", e),
            }
        }

        *self.reports.write().await = aggregation
            .reports
            .into_iter()
            .map(|report| (report.source_id.clone(), report))
            .collect();

        self.publish(NewsSnapshot {
            items: aggregation.items,
            updated_at: Some(now),
            is_cached: false,
        })
        .await;

        Ok(())
    }

    async fn publish(&self, snapshot: NewsSnapshot) {
        if let Err(e) = write_json(self.store.as_ref(), ITEMS_KEY, &snapshot).await {
            error!("Failed to persist news snapshot: {}", e);
        }
        *self.snapshot.write().await = snapshot;
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedStatus>, StorageError> {
        let state = self.load_state().await?;
        let reports = self.reports.read().await;

        Ok(state
            .custom_feeds
            .into_iter()
            .map(|source| FeedStatus {
                cached_items: state
                    .last_fetched_items
                    .get(&source.id)
                    .map_or(0, <[FeedItem]>::len),
                last_error: reports.get(&source.id).and_then(|r| r.error.clone()),
                source,
            })
            .collect())
    }

    pub async fn add_feed(&self, name: &str, url: &str) -> Result<FeedSource, FeedEditError> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(FeedEditError::Invalid("feed name must not be empty".to_string()));
        }
        validate_feed_url(url)?;

        let _guard = self.state_lock.lock().await;
        let mut state = self.load_state().await?;

        if state.custom_feeds.iter().any(|f| f.url == url) {
            return Err(FeedEditError::Invalid(format!("feed {} already exists", url)));
        }

        let feed = FeedSource {
            id: next_feed_id(&state.custom_feeds, Utc::now()),
            name: name.to_string(),
            url: url.to_string(),
            enabled: true,
        };
        state.custom_feeds.push(feed.clone());
        self.save_state(&state).await?;

        info!("Added feed '{}' ({})", feed.name, feed.url);
        Ok(feed)
    }

    pub async fn set_feed_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<FeedSource, FeedEditError> {
        let _guard = self.state_lock.lock().await;
        let mut state = self.load_state().await?;

        let feed = state
            .custom_feeds
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| FeedEditError::NotFound(id.to_string()))?;
        feed.enabled = enabled;
        let feed = feed.clone();

        self.save_state(&state).await?;
        Ok(feed)
    }

    /// Remove a feed along with its cached items.
    pub async fn remove_feed(&self, id: &str) -> Result<(), FeedEditError> {
        let _guard = self.state_lock.lock().await;
        let mut state = self.load_state().await?;

        let before = state.custom_feeds.len();
        state.custom_feeds.retain(|f| f.id != id);
        if state.custom_feeds.len() == before {
            return Err(FeedEditError::NotFound(id.to_string()));
        }
        state.last_fetched_items.remove(id);

        self.save_state(&state).await?;
        self.reports.write().await.remove(id);

        info!("Removed feed '{}'", id);
        Ok(())
    }
}

fn validate_feed_url(url: &str) -> Result<(), FeedEditError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| FeedEditError::Invalid(format!("invalid feed url: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FeedEditError::Invalid(format!(
            "unsupported url scheme '{}'",
            other
        ))),
    }
}

/// Millisecond timestamp id, bumped until it is unused.
fn next_feed_id(existing: &[FeedSource], now: DateTime<Utc>) -> String {
    let mut candidate = now.timestamp_millis();
    while existing.iter().any(|f| f.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

pub async fn start_background_refresh(service: Arc<NewsService>, period: std::time::Duration) {
    service.hydrate().await;

    // Do initial fetch
    info!("Starting initial news refresh");
    if let Err(e) = service.refresh().await {
        error!("Initial news refresh failed: {}", e);
    }

    // Then schedule periodic refreshes
    loop {
        tokio::time::sleep(period).await;
        info!("Starting scheduled news refresh");
        if let Err(e) = service.refresh().await {
            error!("Scheduled news refresh failed: {}", e);
        }
    }
}
