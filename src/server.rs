// src/server.rs

//! Read-only HTTP surface: health probe and cached player lookups.
//!
//! ```text
//! GET /                       service banner
//! GET /health                 scheduler status
//! GET /api/players?uid=&username=
//! GET /api/sync/last          last successful sync time
//! ```

use std::sync::Arc;

use axum::extract::{OriginalUri, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{PlayerFilter, PlayerView};
use crate::pipeline::{CycleScheduler, SchedulerStatus};
use crate::services::CachedLookup;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    lookup: Arc<CachedLookup>,
    scheduler: Option<Arc<CycleScheduler>>,
}

impl AppState {
    pub fn new(lookup: Arc<CachedLookup>, scheduler: Option<Arc<CycleScheduler>>) -> Self {
        Self { lookup, scheduler }
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduler: Option<SchedulerStatus>,
}

#[derive(Debug, Serialize)]
struct PlayersResponse {
    count: usize,
    cached: bool,
    players: Vec<PlayerView>,
}

#[derive(Debug, Serialize)]
struct LastSyncResponse {
    last_sync: Option<DateTime<Utc>>,
}

/// Handler error mapped onto a JSON body.
struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Config(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status == StatusCode::BAD_REQUEST {
            self.0.to_string()
        } else {
            log::error!("[HTTP] {}", self.0);
            "Internal server error".to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/players", get(players))
        .route("/api/sync/last", get(last_sync))
        .fallback(not_found)
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(addr: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, state, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` is cancelled.
pub async fn serve_listener(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    log::info!("[HTTP] Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    log::info!("[HTTP] Server stopped");
    Ok(())
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/api/players", "/api/sync/last"],
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        scheduler: state.scheduler.as_ref().map(|s| s.status()),
    })
}

async fn players(
    State(state): State<AppState>,
    Query(filter): Query<PlayerFilter>,
) -> std::result::Result<Response, ApiError> {
    let lookup = state.lookup.search(&filter).await?;
    if lookup.players.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Player not found" })),
        )
            .into_response());
    }

    Ok(Json(PlayersResponse {
        count: lookup.players.len(),
        cached: lookup.cached,
        players: lookup.players.as_ref().clone(),
    })
    .into_response())
}

async fn last_sync(
    State(state): State<AppState>,
) -> std::result::Result<Json<LastSyncResponse>, ApiError> {
    Ok(Json(LastSyncResponse {
        last_sync: state.lookup.last_sync().await?,
    }))
}

async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "path": uri.to_string(),
            "method": method.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
