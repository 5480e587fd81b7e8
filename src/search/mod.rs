//! Hybrid retrieval over the memory store.
//!
//! Vector similarity and lexical term frequency rank candidates
//! independently; reciprocal-rank fusion combines them. Metadata filters are
//! a predicate pre-intersection over candidate documents, and soft-deleted
//! documents are always excluded. Results carry full provenance so callers
//! can cite their evidence.

pub mod lexical;
pub mod rrf;

pub use rrf::{RrfConfig, reciprocal_rank_fusion};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::{Embedder, cosine_similarity};
use crate::core::{ChunkRecord, DocumentRecord};
use crate::error::Result;
use crate::store::DocStore;

/// Default number of results to return.
pub const DEFAULT_TOP_K: usize = 20;

/// Metadata filters applied before scoring.
///
/// An absent filter key imposes no constraint; soft-deleted documents never
/// match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilters {
    /// Restrict to documents in these parent folders.
    #[serde(default)]
    pub folder_ids: Vec<String>,
    /// Restrict to these media types.
    #[serde(default)]
    pub media_types: Option<Vec<String>>,
    /// Lower bound (inclusive) on `modified_at`.
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    /// Upper bound (inclusive) on `modified_at`.
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
    /// Exact content-hash match.
    #[serde(default)]
    pub version_hash: Option<String>,
}

impl SearchFilters {
    /// Whether a document passes every present filter.
    #[must_use]
    pub fn matches(&self, doc: &DocumentRecord) -> bool {
        if doc.deleted {
            return false;
        }
        if !self.folder_ids.is_empty() {
            let Some(folder) = &doc.parent_folder else {
                return false;
            };
            if !self.folder_ids.contains(folder) {
                return false;
            }
        }
        if let Some(media_types) = &self.media_types
            && !media_types.contains(&doc.media_type)
        {
            return false;
        }
        if let Some(from) = self.date_from {
            match doc.modified_at {
                Some(modified) if modified >= from => {}
                _ => return false,
            }
        }
        if let Some(to) = self.date_to {
            match doc.modified_at {
                Some(modified) if modified <= to => {}
                _ => return false,
            }
        }
        if let Some(hash) = &self.version_hash
            && doc.content_hash != *hash
        {
            return false;
        }
        true
    }
}

/// Search tuning knobs.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Maximum results to return.
    pub top_k: usize,
    /// RRF constant.
    pub rrf_c: u32,
    /// Whether to fuse the lexical arm (false = vector only).
    pub use_hybrid: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rrf_c: 60,
            use_hybrid: true,
        }
    }
}

/// Document provenance attached to every search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitProvenance {
    /// Document display name.
    pub file_name: String,
    /// Document id.
    pub file_id: String,
    /// Content hash (version identity).
    pub version_hash: String,
    /// External revision token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    /// Source-reported modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// Ingestion time.
    pub uploaded_at: DateTime<Utc>,
    /// Shareable link, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_link: Option<String>,
    /// Source tag (drive | gcs | local | email).
    pub source: String,
}

impl HitProvenance {
    fn from_document(doc: &DocumentRecord) -> Self {
        Self {
            file_name: doc.name.clone(),
            file_id: doc.id.clone(),
            version_hash: doc.content_hash.clone(),
            revision_id: doc.revision_id.clone(),
            modified_at: doc.modified_at,
            uploaded_at: doc.uploaded_at,
            drive_link: doc.provenance.link().map(str::to_string),
            source: doc.source().as_str().to_string(),
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Chunk text.
    pub text: String,
    /// Fused (or single-arm) score, higher is better.
    pub score: f64,
    /// Chunk position within its document.
    pub chunk_index: usize,
    /// Owning document id.
    pub document_id: String,
    /// Vector-arm cosine similarity, when that arm ranked the chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    /// Lexical-arm term frequency, when that arm ranked the chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
    /// Citation provenance.
    pub provenance: HitProvenance,
}

/// Hybrid retriever over the document store.
pub struct Retriever {
    store: Arc<dyn DocStore>,
    embedder: Arc<dyn Embedder>,
    hybrid_enabled: bool,
}

impl Retriever {
    /// Creates a retriever; `hybrid_enabled=false` forces the vector arm
    /// only regardless of per-request settings.
    #[must_use]
    pub fn new(store: Arc<dyn DocStore>, embedder: Arc<dyn Embedder>, hybrid_enabled: bool) -> Self {
        Self {
            store,
            embedder,
            hybrid_enabled,
        }
    }

    /// Runs a search, returning ranked hits and the search type used
    /// (`"hybrid"` or `"vector"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the store or embedder fails.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        config: &SearchConfig,
    ) -> Result<(Vec<SearchHit>, &'static str)> {
        let hybrid = config.use_hybrid && self.hybrid_enabled;

        // Filter pre-intersection over candidate documents.
        let documents: HashMap<String, DocumentRecord> = self
            .store
            .list_documents()?
            .into_iter()
            .filter(|doc| filters.matches(doc))
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        let chunks: Vec<ChunkRecord> = self
            .store
            .all_chunks()?
            .into_iter()
            .filter(|chunk| documents.contains_key(&chunk.document_id))
            .collect();

        if chunks.is_empty() {
            return Ok((Vec::new(), if hybrid { "hybrid" } else { "vector" }));
        }

        let candidate_limit = config.top_k * 2;
        let vector_ranked = self.vector_arm(query, &chunks, candidate_limit).await?;
        let lexical_ranked = if hybrid {
            let mut scored = lexical::score_chunks(query, &chunks);
            scored.truncate(candidate_limit);
            scored
        } else {
            Vec::new()
        };

        debug!(
            vector_candidates = vector_ranked.len(),
            lexical_candidates = lexical_ranked.len(),
            hybrid,
            "search arms scored"
        );

        let by_key: HashMap<String, &ChunkRecord> =
            chunks.iter().map(|c| (c.key(), c)).collect();
        let vector_scores: HashMap<String, f32> = vector_ranked
            .iter()
            .map(|(k, s)| (k.clone(), *s))
            .collect();
        let lexical_scores: HashMap<String, f64> = lexical_ranked
            .iter()
            .map(|(k, s)| (k.clone(), *s))
            .collect();

        let fused: Vec<(String, f64)> = if hybrid {
            let vector_keys: Vec<String> = vector_ranked.iter().map(|(k, _)| k.clone()).collect();
            let lexical_keys: Vec<String> = lexical_ranked.iter().map(|(k, _)| k.clone()).collect();
            reciprocal_rank_fusion(&[&vector_keys, &lexical_keys], &RrfConfig::new(config.rrf_c))
        } else {
            vector_ranked
                .iter()
                .map(|(k, s)| (k.clone(), f64::from(*s)))
                .collect()
        };

        let hits: Vec<SearchHit> = fused
            .into_iter()
            .take(config.top_k)
            .filter_map(|(key, score)| {
                let chunk = by_key.get(&key)?;
                let doc = documents.get(&chunk.document_id)?;
                Some(SearchHit {
                    text: chunk.text.clone(),
                    score,
                    chunk_index: chunk.chunk_index,
                    document_id: chunk.document_id.clone(),
                    vector_score: vector_scores.get(&key).copied(),
                    lexical_score: lexical_scores.get(&key).copied(),
                    provenance: HitProvenance::from_document(doc),
                })
            })
            .collect();

        Ok((hits, if hybrid { "hybrid" } else { "vector" }))
    }

    /// Embeds the query once and ranks embedded chunks by cosine.
    async fn vector_arm(
        &self,
        query: &str,
        chunks: &[ChunkRecord],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(String, f32)> = chunks
            .iter()
            .filter_map(|chunk| {
                chunk
                    .embedding
                    .as_ref()
                    .map(|emb| (chunk.key(), cosine_similarity(&query_embedding, emb)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DEFAULT_DIMENSIONS, FallbackEmbedder};
    use crate::core::Provenance;
    use crate::store::{DocStore, SqliteDocStore};

    async fn seed(store: &SqliteDocStore, id_hint: &str, text: &str, folder: Option<&str>) -> String {
        let embedder = FallbackEmbedder::new(DEFAULT_DIMENSIONS);
        let hash = format!("{id_hint:0<20}");
        let mut doc = DocumentRecord::new(
            format!("{id_hint}.txt"),
            "text/plain",
            &hash,
            Provenance::Local {
                path: format!("/data/{id_hint}.txt"),
            },
        );
        doc.parent_folder = folder.map(str::to_string);
        doc.chunk_count = 1;

        let mut chunk = ChunkRecord::new(&doc.id, 0, text, (0, 1), 0);
        chunk.embedding = Some(embedder.embed(text).await.unwrap());
        store.put_chunks(&[chunk]).unwrap();
        store.put_document(&doc).unwrap();
        doc.id
    }

    fn retriever(store: Arc<SqliteDocStore>, hybrid: bool) -> Retriever {
        Retriever::new(
            store,
            Arc::new(FallbackEmbedder::new(DEFAULT_DIMENSIONS)),
            hybrid,
        )
    }

    #[tokio::test]
    async fn test_unique_string_found_at_top() {
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        let target = seed(&store, "target", "the sentinel-9f2a marker lives here", None).await;
        seed(&store, "noise1", "completely unrelated prose about birds", None).await;
        seed(&store, "noise2", "another unrelated document about ships", None).await;

        let (hits, search_type) = retriever(store, true)
            .search("sentinel-9f2a", &SearchFilters::default(), &SearchConfig::default())
            .await
            .unwrap();

        assert_eq!(search_type, "hybrid");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].document_id, target);
        assert!(hits[0].lexical_score.is_some());
    }

    #[tokio::test]
    async fn test_soft_deleted_documents_invisible() {
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        let id = seed(&store, "deadbeef", "the sentinel-9f2a marker lives here", None).await;

        store.soft_delete_document(&id, Utc::now()).unwrap();

        let (hits, _) = retriever(store, true)
            .search("sentinel-9f2a", &SearchFilters::default(), &SearchConfig::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_folder_filter() {
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        seed(&store, "infolder", "alpha document text", Some("folder-a")).await;
        seed(&store, "outside", "alpha document text too", Some("folder-b")).await;

        let filters = SearchFilters {
            folder_ids: vec!["folder-a".to_string()],
            ..Default::default()
        };
        let (hits, _) = retriever(store, true)
            .search("alpha", &filters, &SearchConfig::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].provenance.file_name, "infolder.txt");
    }

    #[tokio::test]
    async fn test_vector_only_mode() {
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        seed(&store, "vecdoc", "quick brown fox", None).await;

        let (hits, search_type) = retriever(store, false)
            .search("quick brown fox", &SearchFilters::default(), &SearchConfig::default())
            .await
            .unwrap();

        assert_eq!(search_type, "vector");
        assert!(!hits.is_empty());
        assert!(hits[0].lexical_score.is_none());
        assert!(hits[0].vector_score.is_some());
    }

    #[tokio::test]
    async fn test_version_hash_filter() {
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        seed(&store, "vhash", "needle text here", None).await;

        let filters = SearchFilters {
            version_hash: Some("not-the-hash".to_string()),
            ..Default::default()
        };
        let (hits, _) = retriever(store, true)
            .search("needle", &filters, &SearchConfig::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_limit() {
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        for i in 0..8 {
            seed(&store, &format!("many{i}"), "repeated needle text", None).await;
        }

        let config = SearchConfig {
            top_k: 3,
            ..Default::default()
        };
        let (hits, _) = retriever(store, true)
            .search("needle", &SearchFilters::default(), &config)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_filters_absent_impose_no_constraint() {
        let doc = DocumentRecord::new(
            "x.txt",
            "text/plain",
            "hash",
            Provenance::Local {
                path: "/x".to_string(),
            },
        );
        assert!(SearchFilters::default().matches(&doc));
    }

    #[test]
    fn test_date_filters() {
        let mut doc = DocumentRecord::new(
            "x.txt",
            "text/plain",
            "hash",
            Provenance::Local {
                path: "/x".to_string(),
            },
        );
        doc.modified_at = Some(Utc::now());

        let filters = SearchFilters {
            date_from: Some(Utc::now() - chrono::Duration::days(1)),
            date_to: Some(Utc::now() + chrono::Duration::days(1)),
            ..Default::default()
        };
        assert!(filters.matches(&doc));

        let filters = SearchFilters {
            date_from: Some(Utc::now() + chrono::Duration::days(1)),
            ..Default::default()
        };
        assert!(!filters.matches(&doc));

        // A document without modified_at fails date-bounded filters.
        doc.modified_at = None;
        let filters = SearchFilters {
            date_to: Some(Utc::now()),
            ..Default::default()
        };
        assert!(!filters.matches(&doc));
    }
}
