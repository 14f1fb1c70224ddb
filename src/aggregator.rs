//! Concurrent fetch, merge and recency filtering of enabled feeds.
//!
//! [`aggregate`] is pure with respect to persistence: it takes a cache
//! snapshot and returns an updated one, leaving storage to the caller.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::feed::{sort_newest_first, FeedCache, FeedItem, FeedSource};
use crate::fetcher::FeedFetcher;

pub const DEFAULT_RECENCY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("recency window of {window} cannot be applied at {now}")]
    WindowOutOfRange {
        now: DateTime<Utc>,
        window: Duration,
    },
}

/// Outcome of one source in one aggregation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source_id: String,
    /// Fresh items returned, or `None` when the fetch failed.
    pub fetched: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Recency-filtered items, newest first.
    pub items: Vec<FeedItem>,
    pub cache: FeedCache,
    pub reports: Vec<SourceReport>,
    /// Set when every source came back empty and the prior cache was used.
    pub from_cache: bool,
}

pub async fn aggregate(
    fetcher: &dyn FeedFetcher,
    sources: &[FeedSource],
    cache: &FeedCache,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Aggregation, AggregationError> {
    let cutoff = now
        .checked_sub_signed(window)
        .ok_or(AggregationError::WindowOutOfRange { now, window })?;

    let enabled: Vec<&FeedSource> = sources.iter().filter(|s| s.enabled).collect();

    let outcomes = join_all(enabled.iter().map(|source| async move {
        let outcome = fetcher.fetch_feed(&source.url, &source.name).await;
        (*source, outcome)
    }))
    .await;

    let mut next_cache = cache.clone();
    let mut fresh = Vec::new();
    let mut reports = Vec::with_capacity(outcomes.len());

    for (source, outcome) in outcomes {
        match outcome {
            Ok(items) => {
                if items.is_empty() {
                    debug!("Feed '{}' returned no items, keeping cached entry", source.name);
                } else {
                    next_cache.insert(source.id.clone(), items.clone());
                }
                reports.push(SourceReport {
                    source_id: source.id.clone(),
                    fetched: Some(items.len()),
                    error: None,
                });
                fresh.extend(items);
            }
            Err(e) => {
                warn!("Failed to fetch feed '{}': {}", source.name, e);
                reports.push(SourceReport {
                    source_id: source.id.clone(),
                    fetched: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let from_cache = fresh.is_empty() && !cache.is_empty();
    let mut items = if from_cache {
        info!("No fresh items from any feed, falling back to cache");
        cache.flatten()
    } else {
        fresh
    };

    items.retain(|item| item.pub_date >= cutoff);
    sort_newest_first(&mut items);

    Ok(Aggregation {
        items,
        cache: next_cache,
        reports,
        from_cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_item;
    use crate::fetcher::testing::StaticFetcher;

    fn source(id: &str, url: &str) -> FeedSource {
        FeedSource {
            id: id.to_string(),
            name: id.to_uppercase(),
            url: url.to_string(),
            enabled: true,
        }
    }

    fn window() -> Duration {
        Duration::hours(DEFAULT_RECENCY_WINDOW_HOURS)
    }

    fn titles(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_all_sources_succeed_merges_sorted() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond(
            "u1",
            vec![
                test_item("a-old", "a", now - Duration::hours(5)),
                test_item("a-new", "a", now - Duration::minutes(10)),
            ],
        );
        fetcher.respond(
            "u2",
            vec![
                test_item("b-mid", "b", now - Duration::hours(2)),
                test_item("b-stale", "b", now - Duration::hours(25)),
            ],
        );

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let result = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["a-new", "b-mid", "a-old"]);
        assert!(!result.from_cache);
        // The cache keeps everything the feed returned, stale items included
        assert_eq!(result.cache.get("b").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_source_keeps_cache_but_not_merged() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond("u1", vec![test_item("X", "a", now - Duration::hours(1))]);
        fetcher.fail("u2");

        let mut cache = FeedCache::new();
        cache.insert("b", vec![test_item("Y", "b", now - Duration::hours(2))]);

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let result = aggregate(&fetcher, &sources, &cache, now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["X"]);
        assert_eq!(titles(result.cache.get("a").unwrap()), vec!["X"]);
        assert_eq!(titles(result.cache.get("b").unwrap()), vec!["Y"]);
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_cache_entry() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond("u1", vec![test_item("X", "a", now)]);
        fetcher.respond("u2", vec![]);

        let mut cache = FeedCache::new();
        cache.insert("b", vec![test_item("Y", "b", now - Duration::hours(2))]);

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let result = aggregate(&fetcher, &sources, &cache, now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["X"]);
        assert_eq!(result.cache.get("b"), cache.get("b"));
        assert_eq!(result.reports[1].fetched, Some(0));
        assert!(result.reports[1].error.is_none());
    }

    #[tokio::test]
    async fn test_all_empty_falls_back_to_cache() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.fail("u1");
        fetcher.respond("u2", vec![]);

        let mut cache = FeedCache::new();
        cache.insert(
            "a",
            vec![
                test_item("A-stale", "a", now - Duration::hours(30)),
                test_item("A", "a", now - Duration::hours(3)),
            ],
        );
        cache.insert("b", vec![test_item("B", "b", now - Duration::hours(1))]);

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let result = aggregate(&fetcher, &sources, &cache, now, window())
            .await
            .unwrap();

        assert!(result.from_cache);
        assert_eq!(titles(&result.items), vec!["B", "A"]);
        assert_eq!(result.cache, cache);
    }

    #[tokio::test]
    async fn test_all_empty_with_empty_cache_is_empty() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.fail("u1");
        fetcher.respond("u2", vec![]);

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let result = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();

        assert!(result.items.is_empty());
        assert!(!result.from_cache);
        assert!(result.cache.is_empty());
    }

    #[tokio::test]
    async fn test_old_items_always_excluded() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond(
            "u1",
            vec![
                test_item("ancient", "a", now - Duration::hours(30)),
                test_item("recent", "a", now - Duration::hours(23)),
            ],
        );

        let sources = vec![source("a", "u1")];
        let result = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["recent"]);
    }

    #[tokio::test]
    async fn test_item_on_cutoff_is_kept() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond("u1", vec![test_item("edge", "a", now - window())]);

        let sources = vec![source("a", "u1")];
        let result = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["edge"]);
    }

    #[tokio::test]
    async fn test_ties_keep_source_order() {
        let now = Utc::now();
        let at = now - Duration::hours(1);
        let fetcher = StaticFetcher::new();
        fetcher.respond("u1", vec![test_item("first", "a", at)]);
        fetcher.respond("u2", vec![test_item("second", "b", at)]);

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let result = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_disabled_sources_are_not_fetched() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond("u1", vec![test_item("X", "a", now)]);
        fetcher.respond("u2", vec![test_item("Z", "b", now)]);

        let mut disabled = source("b", "u2");
        disabled.enabled = false;
        let sources = vec![source("a", "u1"), disabled];

        let result = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();

        assert_eq!(titles(&result.items), vec!["X"]);
        assert_eq!(result.reports.len(), 1);
        assert!(result.cache.get("b").is_none());
    }

    #[tokio::test]
    async fn test_repeated_aggregation_is_idempotent() {
        let now = Utc::now();
        let fetcher = StaticFetcher::new();
        fetcher.respond(
            "u1",
            vec![
                test_item("A1", "a", now - Duration::hours(1)),
                test_item("A2", "a", now - Duration::hours(4)),
            ],
        );
        fetcher.respond("u2", vec![test_item("B1", "b", now - Duration::hours(2))]);

        let sources = vec![source("a", "u1"), source("b", "u2")];
        let first = aggregate(&fetcher, &sources, &FeedCache::new(), now, window())
            .await
            .unwrap();
        let second = aggregate(&fetcher, &sources, &first.cache, now, window())
            .await
            .unwrap();

        assert_eq!(first.items, second.items);
        assert_eq!(first.cache, second.cache);
    }

    #[tokio::test]
    async fn test_unrepresentable_cutoff_is_error() {
        let fetcher = StaticFetcher::new();
        let result = aggregate(
            &fetcher,
            &[],
            &FeedCache::new(),
            DateTime::<Utc>::MIN_UTC,
            window(),
        )
        .await;

        assert!(matches!(
            result,
            Err(AggregationError::WindowOutOfRange { .. })
        ));
    }
}
