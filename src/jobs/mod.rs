//! Job orchestration.
//!
//! The orchestrator accepts a [`JobSpec`], persists it queued, and drives it
//! through the stage DAG for its type. Stage order is strict; each stage
//! completion appends a log entry atomically with the progress update, so a
//! stage's weight is only ever reported for finished work. A stage error
//! aborts the remainder of the DAG with no stage-level retry (retries belong
//! inside workers). Cancellation is observed between stages; in-flight
//! worker calls complete but their results are discarded.

pub mod client;
pub mod dispatcher;
pub mod stages;

pub use client::{WORKER_TIMEOUT, WorkerClient};
pub use dispatcher::{DISPATCH_BATCH, DISPATCH_TICK, dispatch_once, run_dispatcher};
pub use stages::{Stage, StageKind, stages_for};

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::{JobRecord, JobSpec, JobStatus, JobType, new_job_id};
use crate::error::{Error, Result};
use crate::ingest::IngestPipeline;
use crate::store::{BlobStore, DocStore};

/// Drives jobs through their stage DAGs.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn DocStore>,
    client: WorkerClient,
    blobs: Arc<dyn BlobStore>,
    pipeline: Arc<IngestPipeline>,
}

impl Orchestrator {
    /// Wires an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocStore>,
        client: WorkerClient,
        blobs: Arc<dyn BlobStore>,
        pipeline: Arc<IngestPipeline>,
    ) -> Self {
        Self {
            store,
            client,
            blobs,
            pipeline,
        }
    }

    /// The document store this orchestrator persists into.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocStore> {
        &self.store
    }

    /// Submits a job: allocates an id when the caller supplied none, writes
    /// the queued record, and returns it. Idempotent on caller-supplied ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn start_job(&self, spec: JobSpec) -> Result<JobRecord> {
        let id = spec.job_id.clone().unwrap_or_else(new_job_id);
        let record = JobRecord::queued(&id, spec);

        if self.store.create_job(&record)? {
            info!(job = %id, job_type = record.spec.job_type.as_str(), "job created");
        } else {
            info!(job = %id, "job already exists, submission is a no-op");
        }
        Ok(record)
    }

    /// Fetches a job's observable state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn job_status(&self, id: &str) -> Result<Option<JobRecord>> {
        self.store.get_job(id)
    }

    /// Requests cancellation. Returns `false` for terminal or missing jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let cancelled = self.store.cancel_job(id)?;
        if cancelled {
            info!(job = %id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Executes a claimed (running) job to a terminal state.
    ///
    /// Never returns an error: every failure path lands in the job record.
    pub async fn execute_job(&self, job: JobRecord) {
        info!(job = %job.id, job_type = job.spec.job_type.as_str(), "executing job");

        let outcome = match stages_for(job.spec.job_type) {
            Some(stages) => self.run_stages(&job, stages).await,
            None => Err(Error::invariant(format!(
                "job type {} has no stage DAG (not implemented)",
                job.spec.job_type.as_str()
            ))),
        };

        match outcome {
            Ok(result) => {
                match self
                    .store
                    .finish_job(&job.id, JobStatus::Succeeded, "job completed successfully", Some(&result))
                {
                    Ok(true) => info!(job = %job.id, "job completed"),
                    Ok(false) => info!(job = %job.id, "job no longer running, result discarded"),
                    Err(e) => error!(job = %job.id, error = %e, "failed to record job success"),
                }
            }
            Err(Error::Cancelled) => {
                info!(job = %job.id, "job cancelled between stages, partial results discarded");
            }
            Err(e) => {
                let message = format!("job failed [{}]: {e}", e.kind());
                warn!(job = %job.id, error = %e, "job failed");
                if let Err(store_err) =
                    self.store
                        .finish_job(&job.id, JobStatus::Failed, &message, None)
                {
                    error!(job = %job.id, error = %store_err, "failed to record job failure");
                }
            }
        }
    }

    /// Runs the stage DAG, returning the merged result payload.
    async fn run_stages(&self, job: &JobRecord, stages: &[Stage]) -> Result<Value> {
        let mut result = serde_json::Map::new();

        for stage in stages {
            self.check_cancelled(&job.id)?;

            if stage.kind == StageKind::Verify
                && job.spec.job_type == JobType::ResearchAndExport
                && !job.spec.verify
            {
                continue;
            }

            match stage.kind {
                StageKind::Research => {
                    let payload = json!({
                        "query": job.spec.query,
                        "max_results": 30,
                        "source_types": job.spec.sources,
                    });
                    let research = self.client.call("researcher", "/research", &payload).await?;
                    result.insert("research".to_string(), research);
                }
                StageKind::Ingest => {
                    if job.spec.job_type == JobType::RagIngest {
                        let prefs = job.spec.user_prefs.clone().unwrap_or_else(|| json!({}));
                        let ingested = self.client.call("memory", "/ingest", &prefs).await?;
                        result.insert("ingested".to_string(), ingested);
                    } else {
                        let ingested = self
                            .ingest_research_sources(&job.id, result.get("research"))
                            .await?;
                        result.insert("ingest".to_string(), ingested);
                    }
                }
                StageKind::Verify => {
                    let claims = claims_for(job, result.get("research"));
                    let verification = self
                        .client
                        .call("verifier", "/verify_claims", &json!({ "claims": claims }))
                        .await?;
                    result.insert("verification".to_string(), verification);
                }
                StageKind::Export => {
                    let payload = result.get("transform").map_or_else(
                        || {
                            json!({
                                "format": job.spec.deliverables,
                                "data": Value::Object(result.clone()),
                            })
                        },
                        |transform| {
                            json!({
                                "format": job.spec.deliverables,
                                "data_path": transform.get("output_path"),
                            })
                        },
                    );
                    let exports = self.client.call("exporter", "/export", &payload).await?;
                    result.insert("exports".to_string(), exports);
                }
                StageKind::Retrieve => {
                    let data = self.retrieve_dataset(job).await?;
                    result.insert("data".to_string(), data);
                }
                StageKind::Transform => {
                    let data_path = result
                        .get("data")
                        .and_then(|d| d.get("data_path"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::invariant("transform stage without a dataset"))?;
                    let spec = job
                        .spec
                        .user_prefs
                        .as_ref()
                        .and_then(|p| p.get("transform_spec"))
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    let transform = self
                        .client
                        .call(
                            "transformer",
                            "/transform",
                            &json!({ "data_path": data_path, "spec": spec }),
                        )
                        .await?;
                    result.insert("transform".to_string(), transform);
                }
            }

            // Completed-stage weight. A no-op when cancellation landed while
            // the stage was in flight: progress stays at the prior weight.
            self.store
                .append_job_log(&job.id, stage.progress, stage.message)?;
        }

        self.check_cancelled(&job.id)?;
        Ok(Value::Object(result))
    }

    /// Errors with [`Error::Cancelled`] once the job record says so.
    fn check_cancelled(&self, id: &str) -> Result<()> {
        let job = self
            .store
            .get_job(id)?
            .ok_or_else(|| Error::invariant(format!("job vanished mid-execution: {id}")))?;
        if job.status == JobStatus::Cancelled {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Persists the researcher's top sources to object storage and ingests
    /// them into memory, linking citations to memory documents.
    async fn ingest_research_sources(&self, job_id: &str, research: Option<&Value>) -> Result<Value> {
        let Some(research) = research else {
            return Ok(json!({ "sources_ingested": 0, "chunks": 0 }));
        };

        let empty = Vec::new();
        let sources = research
            .get("sources")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let top: Vec<&str> = research
            .get("top_sources_for_rag")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut ingested = 0usize;
        let mut chunks = 0usize;
        for source in sources {
            let id = source.get("id").and_then(Value::as_str).unwrap_or_default();
            if !top.contains(&id) {
                continue;
            }
            let summary = source
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let snippet = source
                .get("snippet")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let text = format!("{summary}\n\n{snippet}");
            if text.trim().is_empty() {
                continue;
            }

            let key = format!("research/{job_id}/{id}.txt");
            self.blobs.put(&key, text.as_bytes()).await?;
            match self.pipeline.ingest_object(&format!("gs://{key}")).await {
                Ok(crate::ingest::FileOutcome::Ingested { chunks: n, .. }) => {
                    ingested += 1;
                    chunks += n;
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!(source = %id, error = %e, "research source ingestion deferred");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(json!({ "sources_ingested": ingested, "chunks": chunks }))
    }

    /// Resolves the data-pipeline input dataset to a blob path, writing an
    /// inline dataset out as CSV first when necessary.
    async fn retrieve_dataset(&self, job: &JobRecord) -> Result<Value> {
        let prefs = job
            .spec
            .user_prefs
            .as_ref()
            .ok_or_else(|| Error::permanent("data-pipeline requires user_prefs"))?;

        if let Some(path) = prefs.get("data_path").and_then(Value::as_str) {
            // Existence check up front so the failure lands in this stage.
            self.blobs.get(path).await?;
            return Ok(json!({ "data_path": path }));
        }

        let rows = prefs
            .get("dataset")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::permanent("data-pipeline requires user_prefs.data_path or user_prefs.dataset"))?;

        let path = format!("datasets/{}-{}.csv", job.id, Uuid::new_v4());
        let bytes = rows_to_csv(rows)?;
        self.blobs.put(&path, &bytes).await?;
        Ok(json!({ "data_path": path, "rows": rows.len() }))
    }
}

/// Claims for the verify stage: the researcher's claims contract when a
/// research stage ran, otherwise the caller-supplied claims.
fn claims_for(job: &JobRecord, research: Option<&Value>) -> Value {
    if let Some(claims) = research.and_then(|r| r.get("claims"))
        && claims.as_array().is_some_and(|c| !c.is_empty())
    {
        return claims.clone();
    }
    job.spec
        .user_prefs
        .as_ref()
        .and_then(|p| p.get("claims"))
        .cloned()
        .unwrap_or_else(|| json!([]))
}

/// Renders an array of flat JSON objects as CSV with a header row.
fn rows_to_csv(rows: &[Value]) -> Result<Vec<u8>> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| Error::invariant(format!("csv render: {e}")))?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| match row.get(col) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| Error::invariant(format!("csv render: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::invariant(format!("csv render: {e}")))
}
