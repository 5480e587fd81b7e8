//! Job API: submit, observe, cancel.

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::{Value, json};

use crate::api::{ApiError, AppState};
use crate::core::{JobSpec, JobStatus, LogEntry};

/// Job routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/start_job", post(start_job))
        .route("/job_status/:id", get(job_status))
        .route("/cancel_job/:id", post(cancel_job))
}

/// `GET /job_status/{id}` response body.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    /// Job id.
    pub job_id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Completion fraction.
    pub progress: f64,
    /// Append-only log.
    pub logs: Vec<LogEntry>,
    /// Final payload, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

async fn start_job(
    State(host): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<Json<Value>, ApiError> {
    let record = host.orchestrator.start_job(spec)?;
    Ok(Json(json!({
        "job_id": record.id,
        "status": "queued",
    })))
}

async fn job_status(
    State(host): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = host
        .orchestrator
        .job_status(&id)?
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
        logs: job.logs,
        result: job.result,
    }))
}

async fn cancel_job(
    State(host): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if host.orchestrator.job_status(&id)?.is_none() {
        return Err(ApiError::not_found(format!("job {id}")));
    }
    host.orchestrator.cancel(&id)?;
    Ok(Json(json!({ "status": "cancelled" })))
}
