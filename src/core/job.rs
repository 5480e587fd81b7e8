//! Job records and lifecycle types.
//!
//! A job is created `queued`, claimed by the dispatcher (`queued → running`),
//! and ends in exactly one terminal state. While non-terminal, `progress` is
//! monotonically non-decreasing and `logs` is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of jobs the orchestrator can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Research a query, ingest the findings, verify claims, export.
    ResearchAndExport,
    /// Retrieve a dataset, transform it, export the result.
    DataPipeline,
    /// Ingest documents into memory.
    RagIngest,
    /// Verify a set of claims.
    Verification,
    /// Caller-defined stage list (not implemented).
    Custom,
}

impl JobType {
    /// Wire name of the job type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResearchAndExport => "research-and-export",
            Self::DataPipeline => "data-pipeline",
            Self::RagIngest => "rag-ingest",
            Self::Verification => "verification",
            Self::Custom => "custom",
        }
    }
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for a dispatcher.
    Queued,
    /// Claimed by a dispatcher, stages executing.
    Running,
    /// All stages completed.
    Succeeded,
    /// A stage error aborted the remainder of the DAG.
    Failed,
    /// Cancellation was requested and observed.
    Cancelled,
}

impl JobStatus {
    /// Whether the status is terminal (no further mutation allowed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(crate::error::Error::invariant(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Structured job request, as submitted by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Caller-supplied id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Job kind, selects the stage DAG.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Free-text query for research-style jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Requested deliverable formats.
    #[serde(default = "default_deliverables")]
    pub deliverables: Vec<String>,
    /// Source kinds the research stage may consult.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    /// Whether to run the verification stage.
    #[serde(default = "default_verify")]
    pub verify: bool,
    /// Free-form per-job options (claims, transform spec, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prefs: Option<Value>,
}

fn default_deliverables() -> Vec<String> {
    vec!["excel".to_string()]
}

fn default_sources() -> Vec<String> {
    vec!["web".to_string()]
}

const fn default_verify() -> bool {
    true
}

impl JobSpec {
    /// Creates a minimal spec of the given type.
    #[must_use]
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_id: None,
            job_type,
            query: None,
            deliverables: default_deliverables(),
            sources: default_sources(),
            verify: default_verify(),
            user_prefs: None,
        }
    }
}

/// One append-only log line on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Human-readable stage or failure message.
    pub message: String,
}

impl LogEntry {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// A persisted job with its full observable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job id.
    pub id: String,
    /// The submitted spec.
    pub spec: JobSpec,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Completion fraction, 0.0 to 1.0, monotone while non-terminal.
    pub progress: f64,
    /// Append-only log, totally ordered.
    pub logs: Vec<LogEntry>,
    /// Final structured payload, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a fresh queued record for the spec.
    #[must_use]
    pub fn queued(id: impl Into<String>, spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            spec,
            status: JobStatus::Queued,
            progress: 0.0,
            logs: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Allocates a date-prefixed job id with a random suffix.
#[must_use]
pub fn new_job_id() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: u32 = rand::random();
    format!("job-{date}-{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(JobType::ResearchAndExport, "research-and-export")]
    #[test_case(JobType::DataPipeline, "data-pipeline")]
    #[test_case(JobType::RagIngest, "rag-ingest")]
    #[test_case(JobType::Verification, "verification")]
    #[test_case(JobType::Custom, "custom")]
    fn test_job_type_wire_names(job_type: JobType, expected: &str) {
        assert_eq!(job_type.as_str(), expected);
        let json = serde_json::to_string(&job_type).unwrap();
        assert_eq!(json, format!("\"{expected}\""));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_spec_defaults() {
        let spec: JobSpec = serde_json::from_str(r#"{"type":"verification"}"#).unwrap();
        assert_eq!(spec.job_type, JobType::Verification);
        assert_eq!(spec.deliverables, vec!["excel".to_string()]);
        assert_eq!(spec.sources, vec!["web".to_string()]);
        assert!(spec.verify);
        assert!(spec.user_prefs.is_none());
    }

    #[test]
    fn test_queued_record() {
        let record = JobRecord::queued("job-1", JobSpec::new(JobType::RagIngest));
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.progress.abs() < f64::EPSILON);
        assert!(record.logs.is_empty());
        assert!(record.result.is_none());
    }

    #[test]
    fn test_new_job_id_shape() {
        let id = new_job_id();
        assert!(id.starts_with("job-"));
        // job-YYYYMMDD-xxxxxxxx
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_new_job_ids_unique() {
        let a = new_job_id();
        let b = new_job_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_round_trip() {
        let mut record = JobRecord::queued("job-2", JobSpec::new(JobType::Verification));
        record.logs.push(LogEntry::now("starting"));
        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "job-2");
        assert_eq!(back.logs.len(), 1);
        assert_eq!(back.logs[0].message, "starting");
    }
}
