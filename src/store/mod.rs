//! Persistent storage interfaces.
//!
//! The platform persists four logical collections (jobs, documents, chunks,
//! hashIndex) plus terminal ingestion failures. [`DocStore`] exposes them
//! with the three primitives the concurrency model relies on:
//! create-if-absent inserts, compare-and-set status transitions, and atomic
//! log-append-with-progress updates. [`BlobStore`] holds raw objects
//! (datasets, rendered deliverables).

pub mod blob;
pub mod schema;
pub mod sqlite;

pub use blob::{BlobStore, LocalBlobStore};
pub use sqlite::SqliteDocStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{ChunkRecord, DocumentRecord, JobRecord, JobStatus};
use crate::error::Result;

/// A file that exhausted its ingestion retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedIngest {
    /// Source reference (path, file id, or URI).
    pub source_ref: String,
    /// Attempts consumed before giving up.
    pub attempts: u32,
    /// Last error message.
    pub error: String,
    /// When the file was abandoned.
    pub failed_at: DateTime<Utc>,
}

/// Storage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Number of jobs stored.
    pub job_count: usize,
    /// Number of live (non-deleted) documents.
    pub document_count: usize,
    /// Number of soft-deleted documents awaiting the sweep.
    pub deleted_document_count: usize,
    /// Total chunks across all documents.
    pub chunk_count: usize,
    /// Schema version.
    pub schema_version: u32,
}

/// Document database behind the platform.
///
/// Implementations must make the conditional operations atomic: only one of
/// two concurrent `create_job`/`hash_insert_if_absent` calls with the same
/// key may observe `true`, and `cas_job_status` must be a single
/// compare-and-set.
pub trait DocStore: Send + Sync {
    /// Initializes storage (creates schema, runs migrations). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation or migration fails.
    fn init(&self) -> Result<()>;

    // ==================== Job Operations ====================

    /// Inserts a job if no job with its id exists.
    ///
    /// Returns `false` when the id was already present (idempotent submit).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn create_job(&self, job: &JobRecord) -> Result<bool>;

    /// Retrieves a job with its full log.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_job(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Lists jobs in a given status, oldest first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_jobs(&self, status: JobStatus, limit: usize) -> Result<Vec<JobRecord>>;

    /// Compare-and-sets a job's status, optionally appending a log entry.
    ///
    /// Returns `false` when the job was not in `from` (another dispatcher
    /// holds the lease, or the job reached a terminal state).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn cas_job_status(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        message: Option<&str>,
    ) -> Result<bool>;

    /// Appends a log entry and raises progress, atomically.
    ///
    /// Progress is monotone: the stored value never decreases, and the
    /// update is a no-op once the job is terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn append_job_log(&self, id: &str, progress: f64, message: &str) -> Result<()>;

    /// Moves a running job to a terminal status with a final log entry and
    /// optional result payload.
    ///
    /// Returns `false` when the job was no longer running (e.g. cancelled);
    /// the result is discarded in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        message: &str,
        result: Option<&Value>,
    ) -> Result<bool>;

    /// Cancels a job unless it already reached a terminal state.
    ///
    /// Returns `false` when the job was terminal (or missing).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn cancel_job(&self, id: &str) -> Result<bool>;

    // ==================== Document Operations ====================

    /// Inserts or replaces a document record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put_document(&self, doc: &DocumentRecord) -> Result<()>;

    /// Retrieves a document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// Lists all documents, live and soft-deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    /// Soft-deletes a document.
    ///
    /// Returns `false` when the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn soft_delete_document(&self, id: &str, when: DateTime<Utc>) -> Result<bool>;

    /// Hard-deletes a document, cascading to its chunks and hash entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn hard_delete_document(&self, id: &str) -> Result<()>;

    /// Lists soft-deleted documents whose `deleted_at` is at or before the
    /// cutoff.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_expired_documents(&self, cutoff: DateTime<Utc>) -> Result<Vec<DocumentRecord>>;

    // ==================== Chunk Operations ====================

    /// Inserts chunks. Committed before the owning document record.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn put_chunks(&self, chunks: &[ChunkRecord]) -> Result<()>;

    /// Retrieves a document's chunks ordered by index.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Retrieves every stored chunk (search candidates; collections are
    /// bounded per tenant).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn all_chunks(&self) -> Result<Vec<ChunkRecord>>;

    // ==================== Hash Index Operations ====================

    /// Records a content hash if absent.
    ///
    /// Returns `false` on a duplicate, making concurrent ingestion of the
    /// same bytes resolve to one winner.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn hash_insert_if_absent(&self, content_hash: &str, document_id: &str) -> Result<bool>;

    /// Looks up the document owning a content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn hash_lookup(&self, content_hash: &str) -> Result<Option<String>>;

    // ==================== Failed Ingest Operations ====================

    /// Persists a terminal ingestion failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put_failed_ingest(&self, failed: &FailedIngest) -> Result<()>;

    /// Lists terminal ingestion failures, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn failed_ingests(&self) -> Result<Vec<FailedIngest>>;

    // ==================== Utility Operations ====================

    /// Gets storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be gathered.
    fn stats(&self) -> Result<StoreStats>;
}
