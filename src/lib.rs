//! # Synthos
//!
//! Multi-agent research and analysis platform. A submitted job is
//! decomposed into stages dispatched to specialist workers (research,
//! memory, verification, transformation, export); three subsystems carry
//! the load:
//!
//! - **Voting engine**: turns an unreliable language-model sampler into a
//!   reliable typed-result producer via red-flagging and
//!   first-to-ahead-by-k voting
//! - **Job orchestrator**: durable, cancellable multi-stage workflows with
//!   compare-and-set dispatch and append-only progress logs
//! - **Memory core**: content-addressed ingestion with token-aware
//!   chunking, embeddings, and hybrid (vector + lexical) retrieval with
//!   soft-delete semantics

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped I/O (memmap2)
#![warn(unsafe_code)]

pub mod api;
pub mod capability;
pub mod config;
pub mod core;
pub mod error;
pub mod host;
pub mod ingest;
pub mod jobs;
pub mod maker;
pub mod search;
pub mod store;
pub mod watch;
pub mod workers;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{ChunkRecord, DocumentRecord, JobRecord, JobSpec, JobStatus, JobType, Provenance};

// Re-export the wiring root
pub use host::{Capabilities, Host};

// Re-export voting engine types
pub use maker::{CancelToken, MakerConfig, first_to_ahead_by_k, parse_last_json};

// Re-export capability traits
pub use capability::{Embedder, Extractor, FolderSource, MailSource, Sampler, TaskInput};

// Re-export storage types
pub use store::{BlobStore, DocStore, LocalBlobStore, SqliteDocStore};

// Re-export ingestion and retrieval types
pub use ingest::{IngestPipeline, IngestReport, TokenChunker};
pub use search::{Retriever, SearchConfig, SearchFilters, SearchHit};
