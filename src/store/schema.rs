//! Database schema definitions.
//!
//! SQL schema and migration scaffolding for the `SQLite` document store.
//! `chunks.document_id` carries no foreign key: chunks are committed before
//! their document record so a crash between the two writes leaves the
//! hashIndex unset and the next run retries cleanly.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Jobs (one row per submitted job)
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    spec TEXT NOT NULL,  -- JSON serialized JobSpec
    status TEXT NOT NULL,
    progress REAL NOT NULL DEFAULT 0.0,
    result TEXT,  -- JSON result payload
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Index for the dispatcher's queued-job poll
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);

-- Append-only job logs, totally ordered per job by rowid
CREATE TABLE IF NOT EXISTS job_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    message TEXT NOT NULL,
    FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs(job_id);

-- Documents with provenance
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    media_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    revision_id TEXT,
    parent_folder TEXT,
    uploaded_at TEXT NOT NULL,
    modified_at TEXT,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    embed_pending INTEGER NOT NULL DEFAULT 0,
    degraded_chunking INTEGER NOT NULL DEFAULT 0,
    provenance TEXT NOT NULL  -- JSON serialized Provenance
);

CREATE INDEX IF NOT EXISTS idx_documents_deleted ON documents(deleted, deleted_at);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);

-- Chunks (no FK to documents: committed before the document row)
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    start_token INTEGER NOT NULL,
    end_token INTEGER NOT NULL,
    start_char INTEGER NOT NULL,
    embedding BLOB,  -- f32 array, little-endian bytes
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index);

-- Content-hash dedupe guard (insert-if-absent)
CREATE TABLE IF NOT EXISTS hash_index (
    content_hash TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    indexed_at TEXT NOT NULL
);

-- Files that exhausted their ingestion retries
CREATE TABLE IF NOT EXISTS failed_ingests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_ref TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    error TEXT NOT NULL,
    failed_at TEXT NOT NULL
);
";

/// SQL to check if schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to get schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to set schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

/// Migrations from older schema versions.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from_version: u32,
    /// Version this migration upgrades to.
    pub to_version: u32,
    /// SQL statements to execute.
    pub sql: &'static str,
}

/// Available migrations.
pub const MIGRATIONS: &[Migration] = &[];

/// Gets migrations needed to upgrade from a version.
#[must_use]
pub fn get_migrations_from(current_version: u32) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.from_version >= current_version && m.to_version <= CURRENT_SCHEMA_VERSION)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }

    #[test]
    fn test_schema_sql_covers_collections() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS jobs"));
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS documents"));
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS chunks"));
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS hash_index"));
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS failed_ingests"));
    }

    #[test]
    fn test_migrations_ordered() {
        for migration in MIGRATIONS {
            assert!(migration.to_version > migration.from_version);
        }
    }

    #[test]
    fn test_get_migrations_from_current_is_empty() {
        assert!(get_migrations_from(CURRENT_SCHEMA_VERSION).is_empty());
    }
}
