//! Read-only operational admin surface: operator introspection into
//! cache/pool/job health, not an end-user UI.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::bootstrap::AppContext;
use crate::error::TtsPlatformError;

pub type AppState = Arc<AppContext>;

/// Build the admin router: health check plus read-only snapshots of the
/// cache, resource pool, and pre-gen job state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/cache/stats", get(cache_stats))
        .route("/pool/stats", get(pool_stats))
        .route("/jobs/{id}", get(job_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.cache.stats().await;
    Json(serde_json::to_value(stats).unwrap_or_else(|_| json!({})))
}

async fn pool_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.pool.stats();
    Json(serde_json::to_value(stats).unwrap_or_else(|_| json!({})))
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, TtsPlatformError> {
    let job = state.job_engine.get_job(&id).await?;
    Ok(Json(serde_json::to_value(job).unwrap_or_else(|_| json!({}))))
}
