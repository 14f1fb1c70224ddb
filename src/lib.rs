//! Widgetify News - the RSS aggregation service behind the news widget
//!
//! Fetches the user's enabled feeds concurrently, merges them into a single
//! recency-filtered list, and falls back to the last known-good items of each
//! feed when fetches fail.

pub mod aggregator;
pub mod config;
pub mod db;
pub mod feed;
pub mod fetcher;
pub mod news;
pub mod routes;
pub mod store;
