//! Memory API: ingestion, search, deletion, watchers, webhooks.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, post};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use crate::api::{ApiError, AppState};
use crate::error::Error;
use crate::ingest::{FileOutcome, IngestReport};
use crate::search::{SearchConfig, SearchFilters};
use crate::watch::{DEFAULT_CHANNEL_TTL_HOURS, poll_inbox};

/// Memory routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/search", post(search))
        .route("/doc/:id", delete(delete_doc))
        .route("/watch/start", post(watch_start))
        .route("/watch/email", post(watch_email))
        .route("/watch/fileshare", post(watch_fileshare).get(list_fileshares))
        .route("/watch/fileshare/:id", delete(stop_fileshare))
        .route("/webhook/drive", post(webhook_drive))
        .route("/webhook/gcs", post(webhook_gcs))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    folder_id: Option<String>,
    gcs_uri: Option<String>,
    local_path: Option<String>,
    #[serde(default = "default_true")]
    recursive: bool,
}

const fn default_true() -> bool {
    true
}

fn report_response(report: &IngestReport) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "files_processed": report.files_processed,
        "chunks": report.chunks,
        "duplicates": report.duplicates,
        "skipped": report.files_skipped,
        "failures": report.failures,
        "timestamp": Utc::now(),
    }))
}

async fn ingest(
    State(host): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(local_path) = &req.local_path {
        let report = host
            .pipeline
            .ingest_local_path(FsPath::new(local_path), req.recursive)
            .await?;
        return Ok(report_response(&report));
    }

    if let Some(folder_id) = &req.folder_id {
        let folders = host
            .folders
            .as_ref()
            .ok_or_else(|| Error::transient("folder provider not configured"))?;
        let report = host
            .pipeline
            .ingest_folder(folders.as_ref(), folder_id, req.recursive)
            .await?;
        return Ok(report_response(&report));
    }

    if let Some(gcs_uri) = &req.gcs_uri {
        let outcome = host.pipeline.ingest_object(gcs_uri).await?;
        let mut report = IngestReport::default();
        match outcome {
            FileOutcome::Ingested { chunks, .. } => {
                report.files_processed = 1;
                report.chunks = chunks;
            }
            FileOutcome::Duplicate => report.duplicates = 1,
            FileOutcome::Skipped { .. } => report.files_skipped = 1,
        }
        return Ok(report_response(&report));
    }

    Err(Error::permanent("folder_id, gcs_uri, or local_path required").into())
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    folder_ids: Vec<String>,
    #[serde(default)]
    mime_types: Option<Vec<String>>,
    #[serde(default)]
    date_from: Option<String>,
    #[serde(default)]
    date_to: Option<String>,
    #[serde(default)]
    version_hash: Option<String>,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_true")]
    use_hybrid: bool,
}

const fn default_top_k() -> usize {
    20
}

fn parse_date(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::permanent(format!("invalid {field}: {e}")).into())
        })
        .transpose()
}

async fn search(
    State(host): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Value>, ApiError> {
    let filters = SearchFilters {
        folder_ids: req.folder_ids,
        media_types: req.mime_types,
        date_from: parse_date("date_from", req.date_from.as_deref())?,
        date_to: parse_date("date_to", req.date_to.as_deref())?,
        version_hash: req.version_hash,
    };
    let config = SearchConfig {
        top_k: req.top_k.max(1),
        use_hybrid: req.use_hybrid,
        ..Default::default()
    };

    let (results, search_type) = host.retriever.search(&req.query, &filters, &config).await?;
    let total = results.len();
    Ok(Json(json!({
        "query": req.query,
        "results": results,
        "total": total,
        "search_type": search_type,
    })))
}

#[derive(Debug, Deserialize, Default)]
struct DeleteRequest {
    #[serde(default)]
    permanent: bool,
}

async fn delete_doc(
    State(host): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<DeleteRequest>>,
) -> Result<Json<Value>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let found = host.pipeline.delete_document(&id, req.permanent)?;
    if !found {
        return Err(ApiError::not_found(format!("document {id}")));
    }

    let mut response = json!({ "status": "deleted", "permanent": req.permanent });
    if !req.permanent
        && let Some(obj) = response.as_object_mut()
    {
        obj.insert(
            "retention_days".to_string(),
            json!(host.settings.retention_days),
        );
    }
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct WatchChannelRequest {
    folder_id: String,
    #[serde(default = "default_ttl_hours")]
    ttl_hours: u64,
}

const fn default_ttl_hours() -> u64 {
    DEFAULT_CHANNEL_TTL_HOURS
}

async fn watch_start(
    State(host): State<AppState>,
    Json(req): Json<WatchChannelRequest>,
) -> Result<Json<Value>, ApiError> {
    let channel = host
        .watches
        .start_channel(&req.folder_id, req.ttl_hours)
        .await?;
    Ok(Json(json!({
        "status": "watching",
        "channel_id": channel.channel_id,
        "expiration": channel.expires_at,
    })))
}

#[derive(Debug, Deserialize)]
struct EmailWatchRequest {
    #[serde(default = "default_label")]
    gmail_label: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_label() -> String {
    "INBOX".to_string()
}

const fn default_max_results() -> usize {
    100
}

async fn watch_email(
    State(host): State<AppState>,
    Json(req): Json<EmailWatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let mail = host
        .mail
        .as_ref()
        .ok_or_else(|| Error::transient("mail provider not configured"))?;

    let report = poll_inbox(mail.as_ref(), &host.pipeline, &req.gmail_label, req.max_results).await?;
    Ok(Json(json!({
        "status": "completed",
        "email_count": report.messages,
        "attachments_processed": report.attachments_processed,
        "label": req.gmail_label,
    })))
}

#[derive(Debug, Deserialize)]
struct FileShareWatchRequest {
    share_path: String,
    #[serde(default = "default_pattern")]
    watch_pattern: String,
    #[serde(default = "default_poll_interval")]
    poll_interval: u64,
}

fn default_pattern() -> String {
    "**/*".to_string()
}

const fn default_poll_interval() -> u64 {
    crate::watch::fileshare::DEFAULT_POLL_INTERVAL_SECS
}

async fn watch_fileshare(
    State(host): State<AppState>,
    Json(req): Json<FileShareWatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = host
        .fileshares
        .start(&req.share_path, &req.watch_pattern, req.poll_interval)?;
    Ok(Json(serde_json::to_value(outcome).map_err(Error::from)?))
}

async fn list_fileshares(State(host): State<AppState>) -> Json<Value> {
    Json(json!({ "watchers": host.fileshares.list() }))
}

async fn stop_fileshare(
    State(host): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !host.fileshares.stop(&id) {
        return Err(ApiError::not_found(format!("watcher {id}")));
    }
    Ok(Json(json!({ "status": "stopped", "watcher_id": id })))
}

async fn webhook_drive(State(host): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let channel_id = headers
        .get("x-goog-channel-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let resource_state = headers
        .get("x-goog-resource-state")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if resource_state == "sync" {
        return Json(json!({ "status": "synced" }));
    }

    match host.watches.handle_notification(channel_id, resource_state) {
        Ok(Some(folder_id)) => {
            // Re-enumeration runs in the background; the provider only
            // needs the acknowledgement.
            let watches = Arc::clone(&host.watches);
            tokio::spawn(async move {
                if let Err(e) = watches.reingest_folder(&folder_id).await {
                    error!(folder = %folder_id, error = %e, "webhook re-ingestion failed");
                }
            });
            Json(json!({ "status": "processing" }))
        }
        _ => Json(json!({ "status": "ignored" })),
    }
}

#[derive(Debug, Deserialize)]
struct GcsEvent {
    bucket: Option<String>,
    name: Option<String>,
}

async fn webhook_gcs(
    State(host): State<AppState>,
    Json(event): Json<GcsEvent>,
) -> Result<Json<Value>, ApiError> {
    let (Some(bucket), Some(name)) = (event.bucket, event.name) else {
        return Ok(Json(json!({ "status": "ignored" })));
    };

    let uri = format!("gs://{bucket}/{name}");
    match host.pipeline.ingest_object(&uri).await? {
        FileOutcome::Ingested { chunks, .. } => {
            Ok(Json(json!({ "status": "indexed", "chunks": chunks })))
        }
        FileOutcome::Duplicate => Ok(Json(json!({ "status": "duplicate" }))),
        FileOutcome::Skipped { reason } => {
            Ok(Json(json!({ "status": "skipped", "reason": reason })))
        }
    }
}
