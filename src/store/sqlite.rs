//! `SQLite` document store implementation.
//!
//! Single-process store with the atomic primitives the platform needs:
//! `INSERT OR IGNORE` for create-if-absent, guarded `UPDATE ... WHERE status`
//! for compare-and-set, and transactions for log-append-with-progress.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::core::{ChunkRecord, DocumentRecord, JobRecord, JobSpec, JobStatus, LogEntry};
use crate::error::{Error, Result};
use crate::store::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
    get_migrations_from,
};
use crate::store::{DocStore, FailedIngest, StoreStats};

/// SQLite-based document store.
///
/// The connection is serialized behind a mutex; callers share the store via
/// `Arc<SqliteDocStore>`.
pub struct SqliteDocStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteDocStore {
    /// Opens or creates a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        // WAL mode for concurrent readers (returns a result row)
        let _: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Creates an in-memory database (testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::invariant("docstore mutex poisoned"))
    }

    fn job_logs(conn: &Connection, job_id: &str) -> Result<Vec<LogEntry>> {
        let mut stmt =
            conn.prepare("SELECT timestamp, message FROM job_logs WHERE job_id = ? ORDER BY id")?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (timestamp, message) = row?;
            logs.push(LogEntry {
                timestamp: parse_ts(&timestamp)?,
                message,
            });
        }
        Ok(logs)
    }

    fn job_from_row(conn: &Connection, row: RawJob) -> Result<JobRecord> {
        let spec: JobSpec = serde_json::from_str(&row.spec)?;
        let result: Option<Value> = match row.result {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(JobRecord {
            logs: Self::job_logs(conn, &row.id)?,
            id: row.id,
            spec,
            status: JobStatus::from_str(&row.status)?,
            progress: row.progress,
            result,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }

    fn doc_from_row(row: RawDoc) -> Result<DocumentRecord> {
        Ok(DocumentRecord {
            id: row.id,
            name: row.name,
            media_type: row.media_type,
            content_hash: row.content_hash,
            revision_id: row.revision_id,
            parent_folder: row.parent_folder,
            uploaded_at: parse_ts(&row.uploaded_at)?,
            modified_at: parse_opt_ts(row.modified_at.as_deref())?,
            chunk_count: row.chunk_count as usize,
            deleted: row.deleted != 0,
            deleted_at: parse_opt_ts(row.deleted_at.as_deref())?,
            embed_pending: row.embed_pending != 0,
            degraded_chunking: row.degraded_chunking != 0,
            provenance: serde_json::from_str(&row.provenance)?,
        })
    }
}

/// Intermediate job row (rusqlite closure output).
struct RawJob {
    id: String,
    spec: String,
    status: String,
    progress: f64,
    result: Option<String>,
    created_at: String,
    updated_at: String,
}

/// Intermediate document row.
struct RawDoc {
    id: String,
    name: String,
    media_type: String,
    content_hash: String,
    revision_id: Option<String>,
    parent_folder: Option<String>,
    uploaded_at: String,
    modified_at: Option<String>,
    chunk_count: i64,
    deleted: i64,
    deleted_at: Option<String>,
    embed_pending: i64,
    degraded_chunking: i64,
    provenance: String,
}

const JOB_COLUMNS: &str = "id, spec, status, progress, result, created_at, updated_at";
const DOC_COLUMNS: &str = "id, name, media_type, content_hash, revision_id, parent_folder, \
                           uploaded_at, modified_at, chunk_count, deleted, deleted_at, \
                           embed_pending, degraded_chunking, provenance";

fn raw_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        spec: row.get(1)?,
        status: row.get(2)?,
        progress: row.get(3)?,
        result: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn raw_doc(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDoc> {
    Ok(RawDoc {
        id: row.get(0)?,
        name: row.get(1)?,
        media_type: row.get(2)?,
        content_hash: row.get(3)?,
        revision_id: row.get(4)?,
        parent_folder: row.get(5)?,
        uploaded_at: row.get(6)?,
        modified_at: row.get(7)?,
        chunk_count: row.get(8)?,
        deleted: row.get(9)?,
        deleted_at: row.get(10)?,
        embed_pending: row.get(11)?,
        degraded_chunking: row.get(12)?,
        provenance: row.get(13)?,
    })
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::invariant(format!("bad timestamp {s}: {e}")))
}

fn parse_opt_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

/// Encodes an embedding as little-endian f32 bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decodes little-endian f32 bytes back into an embedding.
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl DocStore for SqliteDocStore {
    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        let is_init: i64 = conn.query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))?;

        if is_init == 0 {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])?;
        } else {
            let version: Option<String> = conn
                .query_row(GET_VERSION_SQL, [], |row| row.get(0))
                .optional()?;
            let current = version.and_then(|v| v.parse().ok()).unwrap_or(0);
            if current < CURRENT_SCHEMA_VERSION {
                for migration in get_migrations_from(current) {
                    conn.execute_batch(migration.sql)?;
                }
                conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])?;
            }
        }

        Ok(())
    }

    // ==================== Job Operations ====================

    fn create_job(&self, job: &JobRecord) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO jobs (id, spec, status, progress, result, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                job.id,
                serde_json::to_string(&job.spec)?,
                job.status.as_str(),
                job.progress,
                job.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                ts(job.created_at),
                ts(job.updated_at),
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"),
                params![id],
                raw_job,
            )
            .optional()?;

        raw.map(|raw| Self::job_from_row(&conn, raw)).transpose()
    }

    fn list_jobs(&self, status: JobStatus, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at LIMIT ?"
        ))?;
        let raws: Vec<RawJob> = stmt
            .query_map(params![status.as_str(), limit as i64], raw_job)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        raws.into_iter()
            .map(|raw| Self::job_from_row(&conn, raw))
            .collect()
    }

    fn cas_job_status(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let changed = tx.execute(
            "UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            params![to.as_str(), ts(now), id, from.as_str()],
        )?;
        if changed == 1
            && let Some(message) = message
        {
            tx.execute(
                "INSERT INTO job_logs (job_id, timestamp, message) VALUES (?, ?, ?)",
                params![id, ts(now), message],
            )?;
        }
        tx.commit()?;
        Ok(changed == 1)
    }

    fn append_job_log(&self, id: &str, progress: f64, message: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        // Monotone progress, frozen once terminal.
        let changed = tx.execute(
            "UPDATE jobs SET progress = MAX(progress, ?), updated_at = ? \
             WHERE id = ? AND status IN ('queued', 'running')",
            params![progress, ts(now), id],
        )?;
        if changed == 1 {
            tx.execute(
                "INSERT INTO job_logs (job_id, timestamp, message) VALUES (?, ?, ?)",
                params![id, ts(now), message],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        message: &str,
        result: Option<&Value>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(Error::invariant(format!(
                "finish_job requires a terminal status, got {}",
                status.as_str()
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let progress_sql = if status == JobStatus::Succeeded {
            "1.0"
        } else {
            "progress"
        };
        let changed = tx.execute(
            &format!(
                "UPDATE jobs SET status = ?, progress = {progress_sql}, \
                 result = COALESCE(?, result), updated_at = ? \
                 WHERE id = ? AND status = 'running'"
            ),
            params![
                status.as_str(),
                result.map(serde_json::to_string).transpose()?,
                ts(now),
                id,
            ],
        )?;
        if changed == 1 {
            tx.execute(
                "INSERT INTO job_logs (job_id, timestamp, message) VALUES (?, ?, ?)",
                params![id, ts(now), message],
            )?;
        }
        tx.commit()?;
        Ok(changed == 1)
    }

    fn cancel_job(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let changed = tx.execute(
            "UPDATE jobs SET status = 'cancelled', updated_at = ? \
             WHERE id = ? AND status IN ('queued', 'running')",
            params![ts(now), id],
        )?;
        if changed == 1 {
            tx.execute(
                "INSERT INTO job_logs (job_id, timestamp, message) VALUES (?, ?, ?)",
                params![id, ts(now), "cancellation requested"],
            )?;
        }
        tx.commit()?;
        Ok(changed == 1)
    }

    // ==================== Document Operations ====================

    fn put_document(&self, doc: &DocumentRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO documents ({DOC_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                doc.id,
                doc.name,
                doc.media_type,
                doc.content_hash,
                doc.revision_id,
                doc.parent_folder,
                ts(doc.uploaded_at),
                doc.modified_at.map(ts),
                doc.chunk_count as i64,
                i64::from(doc.deleted),
                doc.deleted_at.map(ts),
                i64::from(doc.embed_pending),
                i64::from(doc.degraded_chunking),
                serde_json::to_string(&doc.provenance)?,
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {DOC_COLUMNS} FROM documents WHERE id = ?"),
                params![id],
                raw_doc,
            )
            .optional()?;
        raw.map(Self::doc_from_row).transpose()
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOC_COLUMNS} FROM documents ORDER BY uploaded_at"
        ))?;
        let raws: Vec<RawDoc> = stmt
            .query_map([], raw_doc)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        raws.into_iter().map(Self::doc_from_row).collect()
    }

    fn soft_delete_document(&self, id: &str, when: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE documents SET deleted = 1, deleted_at = ? WHERE id = ?",
            params![ts(when), id],
        )?;
        Ok(changed == 1)
    }

    fn hard_delete_document(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let content_hash: Option<String> = tx
            .query_row(
                "SELECT content_hash FROM documents WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute("DELETE FROM chunks WHERE document_id = ?", params![id])?;
        if let Some(hash) = content_hash {
            tx.execute("DELETE FROM hash_index WHERE content_hash = ?", params![hash])?;
        }
        tx.execute("DELETE FROM documents WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn list_expired_documents(&self, cutoff: DateTime<Utc>) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE deleted = 1 AND deleted_at <= ?"
        ))?;
        let raws: Vec<RawDoc> = stmt
            .query_map(params![ts(cutoff)], raw_doc)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        raws.into_iter().map(Self::doc_from_row).collect()
    }

    // ==================== Chunk Operations ====================

    fn put_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (document_id, chunk_index, text, token_count, start_token, \
                 end_token, start_char, embedding, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.document_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.token_count as i64,
                    chunk.start_token as i64,
                    chunk.end_token as i64,
                    chunk.start_char as i64,
                    chunk.embedding.as_deref().map(encode_embedding),
                    ts(chunk.created_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT document_id, chunk_index, text, token_count, start_token, end_token, \
             start_char, embedding, created_at FROM chunks WHERE document_id = ? \
             ORDER BY chunk_index",
        )?;
        let rows: Vec<(ChunkRecord, String)> = stmt
            .query_map(params![document_id], chunk_row)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        finish_chunks(rows)
    }

    fn all_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT document_id, chunk_index, text, token_count, start_token, end_token, \
             start_char, embedding, created_at FROM chunks ORDER BY document_id, chunk_index",
        )?;
        let rows: Vec<(ChunkRecord, String)> = stmt
            .query_map([], chunk_row)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        finish_chunks(rows)
    }

    // ==================== Hash Index Operations ====================

    fn hash_insert_if_absent(&self, content_hash: &str, document_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO hash_index (content_hash, document_id, indexed_at) \
             VALUES (?, ?, ?)",
            params![content_hash, document_id, ts(Utc::now())],
        )?;
        Ok(changed == 1)
    }

    fn hash_lookup(&self, content_hash: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT document_id FROM hash_index WHERE content_hash = ?",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?)
    }

    // ==================== Failed Ingest Operations ====================

    fn put_failed_ingest(&self, failed: &FailedIngest) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO failed_ingests (source_ref, attempts, error, failed_at) \
             VALUES (?, ?, ?, ?)",
            params![
                failed.source_ref,
                i64::from(failed.attempts),
                failed.error,
                ts(failed.failed_at),
            ],
        )?;
        Ok(())
    }

    fn failed_ingests(&self) -> Result<Vec<FailedIngest>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_ref, attempts, error, failed_at FROM failed_ingests ORDER BY id DESC",
        )?;
        let rows: Vec<(String, i64, String, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        rows.into_iter()
            .map(|(source_ref, attempts, error, failed_at)| {
                Ok(FailedIngest {
                    source_ref,
                    attempts: attempts as u32,
                    error,
                    failed_at: parse_ts(&failed_at)?,
                })
            })
            .collect()
    }

    // ==================== Utility Operations ====================

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let job_count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
        let document_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE deleted = 0",
            [],
            |r| r.get(0),
        )?;
        let deleted_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE deleted = 1",
            [],
            |r| r.get(0),
        )?;
        let chunk_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;

        Ok(StoreStats {
            job_count: job_count as usize,
            document_count: document_count as usize,
            deleted_document_count: deleted_count as usize,
            chunk_count: chunk_count as usize,
            schema_version: CURRENT_SCHEMA_VERSION,
        })
    }
}

/// Maps a chunk row; the timestamp is parsed after the rusqlite closure.
fn chunk_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ChunkRecord, String)> {
    let embedding: Option<Vec<u8>> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok((
        ChunkRecord {
            document_id: row.get(0)?,
            chunk_index: row.get::<_, i64>(1)? as usize,
            text: row.get(2)?,
            token_count: row.get::<_, i64>(3)? as usize,
            start_token: row.get::<_, i64>(4)? as usize,
            end_token: row.get::<_, i64>(5)? as usize,
            start_char: row.get::<_, i64>(6)? as usize,
            embedding: embedding.as_deref().map(decode_embedding),
            created_at: Utc::now(),
        },
        created_at,
    ))
}

fn finish_chunks(rows: Vec<(ChunkRecord, String)>) -> Result<Vec<ChunkRecord>> {
    rows.into_iter()
        .map(|(mut chunk, created_at)| {
            chunk.created_at = parse_ts(&created_at)?;
            Ok(chunk)
        })
        .collect()
}
