//! Domain records shared across the platform.
//!
//! Jobs, documents, and chunks are the three persisted record families.
//! Jobs are mutated only by the orchestrator that owns them; documents and
//! chunks are written by the ingestion pipeline and read by the retriever.

pub mod chunk;
pub mod document;
pub mod job;

pub use chunk::ChunkRecord;
pub use document::{DocumentRecord, Provenance, SourceKind};
pub use job::{JobRecord, JobSpec, JobStatus, JobType, LogEntry, new_job_id};
