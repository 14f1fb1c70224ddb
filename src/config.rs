use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail};
use serde::Deserialize;

use crate::aggregator::DEFAULT_RECENCY_WINDOW_HOURS;
use crate::feed::FeedSource;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Items older than this many hours are hidden
    #[serde(default = "default_recency_window_hours")]
    pub recency_window_hours: i64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Seed feeds, added on startup when their id is not stored yet
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
}

/// One week
const MAX_REFRESH_INTERVAL: u64 = 7 * 24 * 60;

fn default_refresh_interval() -> u64 {
    15
}

fn default_recency_window_hours() -> i64 {
    DEFAULT_RECENCY_WINDOW_HOURS
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval == 0 {
            bail!("refresh_interval must be at least one minute");
        }
        if self.refresh_interval > MAX_REFRESH_INTERVAL {
            bail!(
                "refresh_interval must be at most {} minutes",
                MAX_REFRESH_INTERVAL
            );
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be at least one second");
        }
        if self.recency_window_hours <= 0 {
            bail!("recency_window_hours must be positive");
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if feed.id.trim().is_empty() {
                bail!("feed '{}' has an empty id", feed.name);
            }
            if !seen.insert(feed.id.as_str()) {
                bail!("duplicate feed id '{}'", feed.id);
            }
        }
        Ok(())
    }

    pub fn recency_window(&self) -> anyhow::Result<chrono::Duration> {
        chrono::Duration::try_hours(self.recency_window_hours)
            .ok_or_else(|| anyhow!("recency_window_hours is out of range"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.saturating_mul(60))
    }
}
