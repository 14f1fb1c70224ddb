use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use widgetify_news::config::Config;
use widgetify_news::db::SqliteStore;
use widgetify_news::fetcher::HttpFetcher;
use widgetify_news::news::{start_background_refresh, NewsService};
use widgetify_news::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "widgetify_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("WIDGETIFY_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    // Initialize storage
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:widgetify.db?mode=rwc".to_string());
    let store = SqliteStore::new(&database_url).await?;
    store.initialize().await?;
    info!("Storage initialized");

    let fetcher = HttpFetcher::new(config.fetch_timeout())?;
    let news = Arc::new(NewsService::new(
        Arc::new(fetcher),
        Arc::new(store),
        config.recency_window()?,
    ));
    news.seed_feeds(&config.feeds).await?;

    // Start background refresh task
    let bg_news = news.clone();
    let period = config.refresh_period();
    tokio::spawn(async move {
        start_background_refresh(bg_news, period).await;
    });

    let app = routes::router(Arc::new(AppState { news }));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Server starting on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
