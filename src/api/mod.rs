//! HTTP API surface.
//!
//! One axum router carries the job, ingestion, search, delete, watch, and
//! webhook endpoints plus the worker façade routes, all sharing the
//! [`Host`] as state. Errors map to status codes by kind; the body always
//! carries the machine tag and the human message.

pub mod jobs;
pub mod memory;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde_json::json;

use crate::config::WORKER_NAMES;
use crate::error::Error;
use crate::host::Host;

/// Shared handler state.
pub type AppState = Arc<Host>;

/// API-layer error: a domain error or a plain not-found.
#[derive(Debug)]
pub enum ApiError {
    /// A platform error, mapped by its kind.
    Domain(Error),
    /// The addressed resource does not exist.
    NotFound(String),
}

impl ApiError {
    /// Builds a not-found error for a resource.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Domain(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Domain(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = Json(json!({
                    "error": err.kind(),
                    "message": err.to_string(),
                }));
                (status, body).into_response()
            }
            Self::NotFound(what) => {
                let body = Json(json!({
                    "error": "not_found",
                    "message": format!("{what} not found"),
                }));
                (StatusCode::NOT_FOUND, body).into_response()
            }
        }
    }
}

/// Builds the full application router.
#[must_use]
pub fn router(host: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(jobs::routes())
        .merge(memory::routes())
        .merge(workers::routes())
        .with_state(host)
}

/// Service descriptor.
async fn root(State(host): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "synthos",
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "registered_workers": WORKER_NAMES,
        "maker_k": host.settings.maker_k,
        "hybrid_search": host.settings.hybrid_search,
    }))
}

/// Liveness and wiring summary.
async fn health(State(host): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = host.store.stats()?;
    Ok(Json(json!({
        "status": "healthy",
        "documents": stats.document_count,
        "chunks": stats.chunk_count,
        "jobs": stats.job_count,
        "folder_provider": host.folders.is_some(),
        "mail_provider": host.mail.is_some(),
        "watch_channels": host.watches.channels().len(),
    })))
}
