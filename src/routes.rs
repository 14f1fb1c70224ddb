use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::news::{FeedEditError, NewsService};
use crate::store::StorageError;

pub struct AppState {
    pub news: Arc<NewsService>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/news", get(news))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/feeds", get(list_feeds).post(add_feed))
        .route("/feeds/:id", patch(update_feed).delete(remove_feed))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("storage unavailable")]
    Storage(#[from] StorageError),
}

impl From<FeedEditError> for ApiError {
    fn from(err: FeedEditError) -> Self {
        match err {
            FeedEditError::NotFound(_) => ApiError::NotFound(err.to_string()),
            FeedEditError::Invalid(msg) => ApiError::BadRequest(msg),
            FeedEditError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(e) => {
                error!("Storage error while handling request: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

// Route handlers
pub async fn news(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.news.snapshot().await)
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Spawn the refresh task
    let news = state.news.clone();
    tokio::spawn(async move {
        if let Err(e) = news.refresh().await {
            error!("Requested news refresh failed: {}", e);
        }
    });

    // Return refreshing state immediately
    Json(json!({ "refreshing": true }))
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.news.is_refreshing().await;
    Json(json!({ "refreshing": refreshing }))
}

pub async fn list_feeds(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.news.list_feeds().await?))
}

#[derive(Debug, Deserialize)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
}

pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewFeed>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = state.news.add_feed(&body.name, &body.url).await?;
    Ok((StatusCode::CREATED, Json(feed)))
}

#[derive(Debug, Deserialize)]
pub struct FeedUpdate {
    pub enabled: bool,
}

pub async fn update_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<FeedUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = state.news.set_feed_enabled(&id, body.enabled).await?;
    Ok(Json(feed))
}

pub async fn remove_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.news.remove_feed(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health() -> &'static str {
    "OK"
}
