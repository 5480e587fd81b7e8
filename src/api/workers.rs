//! Worker façade routes.
//!
//! Thin HTTP translations over the MAKER-wrapped workers; the orchestrator
//! reaches these through its worker registry like any external caller.

use axum::Json;
use axum::Router;
use axum::routing::post;
use serde::Deserialize;
use serde_json::Value;

use crate::api::{ApiError, AppState};
use crate::workers::{ExportOutcome, PanelConsensus, ResearchResponse, TransformOutcome, VerificationReport};
use axum::extract::State;

/// Worker routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/research", post(research))
        .route("/verify_claims", post(verify_claims))
        .route("/verify_panel", post(verify_panel))
        .route("/transform", post(transform))
        .route("/export", post(export))
}

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
    #[serde(default)]
    #[allow(dead_code)]
    source_types: Vec<String>,
}

const fn default_max_results() -> usize {
    30
}

async fn research(
    State(host): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>, ApiError> {
    let response = host.researcher.research(&req.query, req.max_results).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    #[serde(default)]
    claims: Vec<Value>,
}

async fn verify_claims(
    State(host): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerificationReport>, ApiError> {
    let report = host.verifier.verify_claims(&req.claims).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct PanelRequest {
    #[serde(default)]
    claims: Vec<Value>,
    #[serde(default = "default_verifiers")]
    num_verifiers: usize,
}

const fn default_verifiers() -> usize {
    3
}

async fn verify_panel(
    State(host): State<AppState>,
    Json(req): Json<PanelRequest>,
) -> Result<Json<PanelConsensus>, ApiError> {
    let consensus = host
        .verifier
        .verify_panel(&req.claims, req.num_verifiers)
        .await?;
    Ok(Json(consensus))
}

#[derive(Debug, Deserialize)]
struct TransformRequest {
    data_path: String,
    #[serde(default)]
    spec: Value,
}

async fn transform(
    State(host): State<AppState>,
    Json(req): Json<TransformRequest>,
) -> Result<Json<TransformOutcome>, ApiError> {
    let outcome = host.transformer.transform(&req.data_path, &req.spec).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ExportRequest {
    format: Vec<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    data_path: Option<String>,
}

async fn export(
    State(host): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportOutcome>, ApiError> {
    let outcome = host
        .exporter
        .export(&req.format, &req.data, req.data_path.as_deref())
        .await?;
    Ok(Json(outcome))
}
