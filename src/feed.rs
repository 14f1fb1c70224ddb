use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-configured feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Where an item came from, as shown next to its title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSource {
    pub name: String,
    pub url: String,
}

/// One parsed entry from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: ItemSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub pub_date: DateTime<Utc>,
}

/// Last known-good items per feed source id.
///
/// Entries are iterated in id order, so flattening is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedCache(BTreeMap<String, Vec<FeedItem>>);

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_id: &str) -> Option<&[FeedItem]> {
        self.0.get(source_id).map(Vec::as_slice)
    }

    /// Replace the entry for `source_id`. Empty lists are ignored so an
    /// existing entry is never wiped out.
    pub fn insert(&mut self, source_id: impl Into<String>, items: Vec<FeedItem>) {
        if !items.is_empty() {
            self.0.insert(source_id.into(), items);
        }
    }

    pub fn remove(&mut self, source_id: &str) -> Option<Vec<FeedItem>> {
        self.0.remove(source_id)
    }

    /// Keep only entries whose id satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|id, _| keep(id));
    }

    /// True when no entry holds a single item.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    pub fn item_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn flatten(&self) -> Vec<FeedItem> {
        self.0.values().flatten().cloned().collect()
    }
}

impl FromIterator<(String, Vec<FeedItem>)> for FeedCache {
    fn from_iter<I: IntoIterator<Item = (String, Vec<FeedItem>)>>(iter: I) -> Self {
        let mut cache = FeedCache::new();
        for (id, items) in iter {
            cache.insert(id, items);
        }
        cache
    }
}

/// Sort newest first. The sort is stable, so equal timestamps keep their
/// incoming order.
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
}

#[cfg(test)]
pub(crate) fn test_item(title: &str, source: &str, pub_date: DateTime<Utc>) -> FeedItem {
    FeedItem {
        title: title.to_string(),
        description: None,
        source: ItemSource {
            name: source.to_string(),
            url: format!("https://{}.example.com", source),
        },
        link: Some(format!("https://{}.example.com/{}", source, title)),
        pub_date,
    }
}
