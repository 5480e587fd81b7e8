//! Stage DAGs per job type.
//!
//! Each job type maps to a fixed, strictly ordered stage list with the
//! progress weight reported when the stage completes; reaching 1.0 happens
//! only at the terminal success transition.

use crate::core::JobType;

/// One stage of a job's DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Gather sources for the query.
    Research,
    /// Ingest research output into memory.
    Ingest,
    /// Verify claims.
    Verify,
    /// Render and upload deliverables.
    Export,
    /// Fetch the input dataset.
    Retrieve,
    /// Apply a transformation plan to the dataset.
    Transform,
}

/// A stage with the progress weight and log message its completion reports.
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    /// What runs in this stage.
    pub kind: StageKind,
    /// Progress reached when the stage completes.
    pub progress: f64,
    /// Log line appended when the stage completes.
    pub message: &'static str,
}

const fn stage(kind: StageKind, progress: f64, message: &'static str) -> Stage {
    Stage {
        kind,
        progress,
        message,
    }
}

static RESEARCH_AND_EXPORT: [Stage; 4] = [
    stage(StageKind::Research, 0.2, "sources researched"),
    stage(StageKind::Ingest, 0.4, "research ingested to memory"),
    stage(StageKind::Verify, 0.6, "claims verified"),
    stage(StageKind::Export, 0.8, "deliverables generated"),
];

static DATA_PIPELINE: [Stage; 3] = [
    stage(StageKind::Retrieve, 0.3, "data retrieved"),
    stage(StageKind::Transform, 0.6, "data transformed"),
    stage(StageKind::Export, 0.9, "data exported"),
];

static RAG_INGEST: [Stage; 1] = [stage(StageKind::Ingest, 0.5, "documents ingested")];

static VERIFICATION: [Stage; 1] = [stage(StageKind::Verify, 0.5, "claims verified")];

/// The stage DAG for a job type, or `None` for `custom`.
#[must_use]
pub const fn stages_for(job_type: JobType) -> Option<&'static [Stage]> {
    match job_type {
        JobType::ResearchAndExport => Some(&RESEARCH_AND_EXPORT),
        JobType::DataPipeline => Some(&DATA_PIPELINE),
        JobType::RagIngest => Some(&RAG_INGEST),
        JobType::Verification => Some(&VERIFICATION),
        JobType::Custom => None,
    }
}
