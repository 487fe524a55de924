//! Root-level error type, the single place crate-local error enums are
//! converted into one type for the CLI and admin HTTP surface. Library
//! crates never depend on this type or on each other's errors beyond what
//! `#[from]` already wires up inside `tts-pregen`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Aggregate error type for the process-wiring boundary.
#[derive(Debug, Error)]
pub enum TtsPlatformError {
    #[error("cache error: {0}")]
    Cache(#[from] tts_cache::CacheError),

    #[error("resource pool error: {0}")]
    Pool(#[from] tts_pool::PoolError),

    #[error("pre-gen error: {0}")]
    Pregen(#[from] tts_pregen::PregenError),

    #[error("database error: {0}")]
    Database(#[from] tts_db::DbError),

    #[error("session layer error: {0}")]
    Fov(#[from] fov_context::FovError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for TtsPlatformError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
