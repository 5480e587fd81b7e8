//! Ingestion pipeline.
//!
//! Per-file flow: enumerate, hash, dedupe-check, download, extract, chunk,
//! embed, commit. The commit order is chunks, then the document record, then
//! the hashIndex entry; because the hashIndex lands last and insertion is
//! create-if-absent, a crash mid-commit leaves no entry and the next run
//! retries the file, making the pipeline idempotent under at-least-once
//! execution.

pub mod chunker;
pub mod local;
pub mod quota;
pub mod retry;
pub mod sweep;

pub use chunker::{DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_TOKENS, TokenChunk, TokenChunker};
pub use quota::TokenBucket;
pub use retry::{Backoff, DEFAULT_MAX_ATTEMPTS, RetryQueue};
pub use sweep::sweep_once;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::capability::{Embedder, Extractor, FolderSource, RemoteFileMeta};
use crate::core::{ChunkRecord, DocumentRecord, Provenance};
use crate::error::{Error, Result};
use crate::store::{BlobStore, DocStore, FailedIngest};

/// Embedding batch size.
const EMBED_BATCH_SIZE: usize = 5;

/// Folders holding more than this many direct items trigger a shardable
/// warning.
const SHARDABLE_FOLDER_THRESHOLD: usize = 10_000;

/// Metadata accompanying one file's content through the pipeline.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Display name.
    pub name: String,
    /// Media type.
    pub media_type: String,
    /// Source-reported modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// External revision token.
    pub revision_id: Option<String>,
    /// Containing folder reference.
    pub parent_folder: Option<String>,
    /// Source-specific provenance.
    pub provenance: Provenance,
}

impl FileMeta {
    /// Creates metadata with just a name, media type, and provenance.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            modified_at: None,
            revision_id: None,
            parent_folder: None,
            provenance,
        }
    }
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was chunked, embedded, and committed.
    Ingested {
        /// Committed document id.
        document_id: String,
        /// Number of chunks written.
        chunks: usize,
    },
    /// The content hash was already indexed; nothing was written.
    Duplicate,
    /// The file produced no text and was skipped with a warning.
    Skipped {
        /// Why the file was skipped.
        reason: String,
    },
}

/// Aggregate counts for a multi-file ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Files committed.
    pub files_processed: usize,
    /// Files skipped (no text, unsupported media type).
    pub files_skipped: usize,
    /// Files whose content hash was already indexed.
    pub duplicates: usize,
    /// Chunks written.
    pub chunks: usize,
    /// Files abandoned after exhausting retries.
    pub failures: usize,
}

impl IngestReport {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Ingested { chunks, .. } => {
                self.files_processed += 1;
                self.chunks += chunks;
            }
            FileOutcome::Duplicate => self.duplicates += 1,
            FileOutcome::Skipped { .. } => self.files_skipped += 1,
        }
    }
}

/// Content-addressed ingestion pipeline.
pub struct IngestPipeline {
    store: Arc<dyn DocStore>,
    blobs: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    chunker: TokenChunker,
    quota: TokenBucket,
    backoff: Backoff,
    max_attempts: u32,
}

impl IngestPipeline {
    /// Wires a pipeline from its capabilities.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocStore>,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        quota_per_minute: u32,
    ) -> Self {
        Self {
            store,
            blobs,
            embedder,
            extractor,
            chunker: TokenChunker::default(),
            quota: TokenBucket::per_minute(quota_per_minute),
            backoff: Backoff::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Replaces the chunker (size, overlap, or degraded mode).
    #[must_use]
    pub fn with_chunker(mut self, chunker: TokenChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Replaces the retry backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff, max_attempts: u32) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The document store behind this pipeline.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocStore> {
        &self.store
    }

    // ==================== Single-file entry points ====================

    /// Ingests raw content with the given metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaExceeded`] when the rate limiter rejects the
    /// file, or a storage/embedding error from the commit path.
    pub async fn ingest_content(&self, content: &[u8], meta: FileMeta) -> Result<FileOutcome> {
        self.quota.try_acquire()?;
        let hash = sha256_hex(content);
        self.dedupe_and_commit(content, &hash, meta).await
    }

    /// Ingests one local file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or committed.
    pub async fn ingest_local_file(&self, path: &Path) -> Result<FileOutcome> {
        self.quota.try_acquire()?;
        let content = local::read_file(path)?;
        let modified_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let mut meta = FileMeta::new(
            path.file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            local::media_type_for_path(path),
            Provenance::Local {
                path: path.display().to_string(),
            },
        );
        meta.modified_at = modified_at;
        meta.parent_folder = path.parent().map(|p| p.display().to_string());

        let hash = sha256_hex(&content);
        self.dedupe_and_commit(&content, &hash, meta).await
    }

    /// Ingests one object-storage blob addressed by URI (`gs://bucket/key`).
    ///
    /// # Errors
    ///
    /// Returns an error for malformed URIs or missing blobs.
    pub async fn ingest_object(&self, uri: &str) -> Result<FileOutcome> {
        self.quota.try_acquire()?;
        let key = uri
            .strip_prefix("gs://")
            .ok_or_else(|| Error::permanent(format!("unsupported object URI: {uri}")))?;
        let content = self.blobs.get(key).await?;

        let name = key.rsplit('/').next().unwrap_or(key).to_string();
        let media_type = local::media_type_for_path(Path::new(&name));
        let meta = FileMeta::new(
            name,
            media_type,
            Provenance::Gcs {
                uri: uri.to_string(),
            },
        );

        let hash = sha256_hex(&content);
        self.dedupe_and_commit(&content, &hash, meta).await
    }

    // ==================== Multi-file entry points ====================

    /// Ingests a local path (file or directory), with per-file retries.
    ///
    /// # Errors
    ///
    /// Returns an error when the path cannot be enumerated; per-file errors
    /// are retried and, once exhausted, recorded as failures.
    pub async fn ingest_local_path(&self, path: &Path, recursive: bool) -> Result<IngestReport> {
        let files = local::enumerate_files(path, recursive)?;
        let mut report = IngestReport::default();
        let mut queue: RetryQueue<PathBuf> = RetryQueue::new(self.max_attempts);

        for file in files {
            match self.ingest_local_file(&file).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => self.note_failure(&mut queue, &mut report, file.clone(), 1, &e)?,
            }
        }

        while let Some(task) = queue.pop() {
            tokio::time::sleep(self.backoff.jittered_delay(task.attempts)).await;
            match self.ingest_local_file(&task.item).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    let item = task.item.clone();
                    self.note_failure(&mut queue, &mut report, item, task.attempts + 1, &e)?;
                }
            }
        }

        info!(
            path = %path.display(),
            processed = report.files_processed,
            chunks = report.chunks,
            duplicates = report.duplicates,
            "local ingestion complete"
        );
        Ok(report)
    }

    /// Ingests a remote folder tree, with per-file retries.
    ///
    /// Traversal is iterative with an explicit work stack; visited folder
    /// ids are tracked so symbolic cycles terminate.
    ///
    /// # Errors
    ///
    /// Returns an error when folder enumeration fails outright.
    pub async fn ingest_folder(
        &self,
        source: &dyn FolderSource,
        folder_id: &str,
        recursive: bool,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut queue: RetryQueue<(RemoteFileMeta, String)> = RetryQueue::new(self.max_attempts);
        let mut stack = vec![folder_id.to_string()];
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let items = source.list_folder(&current).await?;
            if items.len() > SHARDABLE_FOLDER_THRESHOLD {
                warn!(
                    folder = %current,
                    items = items.len(),
                    "folder exceeds {SHARDABLE_FOLDER_THRESHOLD} items, consider sharding"
                );
            }

            for item in items {
                if item.is_folder {
                    if recursive {
                        stack.push(item.id);
                    }
                    continue;
                }
                match self.ingest_remote_file(source, &item, &current).await {
                    Ok(outcome) => report.record(&outcome),
                    Err(e) => {
                        let key = (item, current.clone());
                        self.note_failure(&mut queue, &mut report, key, 1, &e)?;
                    }
                }
            }
        }

        while let Some(task) = queue.pop() {
            tokio::time::sleep(self.backoff.jittered_delay(task.attempts)).await;
            let (file, folder) = task.item.clone();
            match self.ingest_remote_file(source, &file, &folder).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    self.note_failure(&mut queue, &mut report, task.item, task.attempts + 1, &e)?;
                }
            }
        }

        info!(
            folder = %folder_id,
            processed = report.files_processed,
            chunks = report.chunks,
            duplicates = report.duplicates,
            "folder ingestion complete"
        );
        Ok(report)
    }

    /// Ingests one remote file, preferring the vendor checksum for dedupe.
    ///
    /// # Errors
    ///
    /// Returns an error when the download or commit fails.
    pub async fn ingest_remote_file(
        &self,
        source: &dyn FolderSource,
        file: &RemoteFileMeta,
        parent_folder: &str,
    ) -> Result<FileOutcome> {
        self.quota.try_acquire()?;

        // Cheap dedupe before downloading when the provider supplies a hash.
        if let Some(checksum) = &file.checksum
            && self.store.hash_lookup(checksum)?.is_some()
        {
            debug!(file = %file.name, "duplicate skipped via vendor checksum");
            return Ok(FileOutcome::Duplicate);
        }

        let content = source.download(&file.id).await?;
        let hash = file
            .checksum
            .clone()
            .unwrap_or_else(|| sha256_hex(&content));

        let mut meta = FileMeta::new(
            file.name.clone(),
            file.media_type.clone(),
            Provenance::Drive {
                file_id: file.id.clone(),
                drive_link: source.file_link(&file.id),
            },
        );
        meta.modified_at = file.modified_at;
        meta.revision_id = file.revision_id.clone();
        meta.parent_folder = Some(parent_folder.to_string());

        self.dedupe_and_commit(&content, &hash, meta).await
    }

    // ==================== Deletion ====================

    /// Deletes a document: soft by default, hard when `permanent`.
    ///
    /// Returns `false` when the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub fn delete_document(&self, id: &str, permanent: bool) -> Result<bool> {
        if self.store.get_document(id)?.is_none() {
            return Ok(false);
        }
        if permanent {
            self.store.hard_delete_document(id)?;
            info!(document = %id, "permanently deleted");
        } else {
            self.store.soft_delete_document(id, Utc::now())?;
            info!(document = %id, "soft-deleted");
        }
        Ok(true)
    }

    // ==================== Internals ====================

    fn note_failure<T>(
        &self,
        queue: &mut RetryQueue<T>,
        report: &mut IngestReport,
        item: T,
        attempts: u32,
        error: &Error,
    ) -> Result<()>
    where
        T: SourceRef,
    {
        if matches!(error, Error::Invariant { .. }) {
            return Err(Error::invariant(error.to_string()));
        }

        let source_ref = item.source_ref();
        let abandoned = if error.is_retryable() {
            !queue.push_failed(item, attempts, error.to_string())
        } else {
            true
        };

        if abandoned {
            warn!(source = %source_ref, error = %error, attempts, "file abandoned after ingestion failure");
            self.store.put_failed_ingest(&FailedIngest {
                source_ref,
                attempts,
                error: error.to_string(),
                failed_at: Utc::now(),
            })?;
            report.failures += 1;
        }
        Ok(())
    }

    async fn dedupe_and_commit(
        &self,
        content: &[u8],
        hash: &str,
        meta: FileMeta,
    ) -> Result<FileOutcome> {
        if self.store.hash_lookup(hash)?.is_some() {
            debug!(file = %meta.name, "duplicate skipped");
            return Ok(FileOutcome::Duplicate);
        }

        let text = match self.extractor.extract(content, &meta.media_type).await {
            Ok(text) => text,
            Err(Error::ExtractionFailed { media_type, reason }) => {
                warn!(file = %meta.name, %media_type, %reason, "extraction failed, skipping");
                return Ok(FileOutcome::Skipped { reason });
            }
            Err(e) => return Err(e),
        };
        if text.trim().is_empty() {
            warn!(file = %meta.name, "no text extracted, skipping");
            return Ok(FileOutcome::Skipped {
                reason: "no text extracted".to_string(),
            });
        }

        if self.chunker.is_degraded() {
            warn!(file = %meta.name, "tokenizer unavailable, using character approximation");
        }
        let chunks = self.chunker.chunk(&text)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (embeddings, embed_pending) = self.embed_batched(&texts).await;

        let document_id = DocumentRecord::id_for_hash(hash);
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut record = ChunkRecord::new(
                    &document_id,
                    i,
                    &chunk.text,
                    (chunk.start_token, chunk.end_token),
                    chunk.start_char,
                );
                record.embedding = embeddings.as_ref().and_then(|e| e.get(i).cloned());
                record
            })
            .collect();

        // Commit order: chunks, then the document, then the hash entry.
        self.store.put_chunks(&records)?;

        let mut doc = DocumentRecord::new(&meta.name, &meta.media_type, hash, meta.provenance);
        doc.revision_id = meta.revision_id;
        doc.parent_folder = meta.parent_folder;
        doc.modified_at = meta.modified_at;
        doc.chunk_count = records.len();
        doc.embed_pending = embed_pending;
        doc.degraded_chunking = self.chunker.is_degraded();
        self.store.put_document(&doc)?;

        if !self.store.hash_insert_if_absent(hash, &document_id)? {
            // A concurrent ingestion of the same bytes won; both wrote the
            // same content-derived id, so nothing diverged.
            return Ok(FileOutcome::Duplicate);
        }

        info!(
            file = %doc.name,
            document = %document_id,
            chunks = records.len(),
            embed_pending,
            "indexed document"
        );
        Ok(FileOutcome::Ingested {
            document_id,
            chunks: records.len(),
        })
    }

    /// Embeds chunk texts in batches; a failure leaves chunks unembedded.
    async fn embed_batched(&self, texts: &[String]) -> (Option<Vec<Vec<f32>>>, bool) {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            match self.embedder.embed_batch(batch).await {
                Ok(embeddings) => all.extend(embeddings),
                Err(e) => {
                    warn!(error = %e, "embedding failed, committing chunks without vectors");
                    return (None, true);
                }
            }
        }
        (Some(all), false)
    }
}

/// Items that can be named in a `FailedIngest` record.
pub trait SourceRef {
    /// Human-readable reference to the source (path, id, URI).
    fn source_ref(&self) -> String;
}

impl SourceRef for PathBuf {
    fn source_ref(&self) -> String {
        self.display().to_string()
    }
}

impl SourceRef for (RemoteFileMeta, String) {
    fn source_ref(&self) -> String {
        format!("{}/{}", self.1, self.0.id)
    }
}

/// Hex-encoded SHA-256 of the content.
#[must_use]
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_report_record() {
        let mut report = IngestReport::default();
        report.record(&FileOutcome::Ingested {
            document_id: "d".to_string(),
            chunks: 4,
        });
        report.record(&FileOutcome::Duplicate);
        report.record(&FileOutcome::Skipped {
            reason: "x".to_string(),
        });

        assert_eq!(report.files_processed, 1);
        assert_eq!(report.chunks, 4);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.files_skipped, 1);
    }
}
