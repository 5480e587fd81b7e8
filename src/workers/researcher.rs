//! Research worker.
//!
//! Research is grounded in memory: candidate sources come from hybrid
//! retrieval over the ingested corpus, each source is summarized and scored
//! through the voting engine, and the response carries the claims contract
//! (`claims: [{text, sources}]`) downstream verification consumes. Source
//! ids are memory document ids, so citations resolve back to provenance.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capability::{Sampler, TaskInput};
use crate::error::Result;
use crate::maker::{CancelToken, MakerConfig, first_to_ahead_by_k, parse_last_json};
use crate::search::{Retriever, SearchConfig, SearchFilters, SearchHit};

/// Raw-output cap for per-source summaries.
const SUMMARY_RAW_CAP: usize = 1200;

/// Credibility threshold for recommending a source for ingestion.
const RAG_CREDIBILITY_THRESHOLD: f64 = 0.7;

/// Maximum sources recommended for ingestion.
const RAG_SOURCE_LIMIT: usize = 10;

/// Maximum sources summarized per request.
const SUMMARY_LIMIT: usize = 10;

/// A claim with the sources that back it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// Claim text.
    pub text: String,
    /// Ids of the sources the claim cites.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// One researched source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSource {
    /// Source id (memory document id).
    pub id: String,
    /// Source title.
    pub title: String,
    /// Link to the source, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Retrieved passage the summary was built from.
    pub snippet: String,
    /// Model-written summary.
    pub summary: String,
    /// Credibility score, 0.0 to 1.0.
    pub credibility_score: f64,
    /// Source tag (drive | gcs | local | email).
    pub source_type: String,
}

/// Research response with synthesis and the claims contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResponse {
    /// Sources ordered by credibility, best first.
    pub sources: Vec<ResearchSource>,
    /// Cross-source synthesis.
    pub synthesis: String,
    /// Claims with source citations, for the verification stage.
    pub claims: Vec<Claim>,
    /// Source ids recommended for memory ingestion.
    pub top_sources_for_rag: Vec<String>,
    /// Total sources considered.
    pub total_found: usize,
}

/// The typed per-source result MAKER validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryOutput {
    summary: String,
    credibility_score: f64,
    #[serde(default)]
    claims: Vec<String>,
}

/// Retrieval-grounded research worker.
pub struct Researcher {
    sampler: Arc<dyn Sampler>,
    retriever: Arc<Retriever>,
    config: MakerConfig,
    model: String,
    cancel: CancelToken,
}

impl Researcher {
    /// Creates a researcher.
    #[must_use]
    pub fn new(
        sampler: Arc<dyn Sampler>,
        retriever: Arc<Retriever>,
        config: MakerConfig,
        model: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            sampler,
            retriever,
            config: config.max_raw_len(SUMMARY_RAW_CAP),
            model: model.into(),
            cancel,
        }
    }

    /// Researches a query against the memory corpus.
    ///
    /// # Errors
    ///
    /// Returns an error when retrieval fails or a summary vote does not
    /// converge.
    pub async fn research(&self, query: &str, max_results: usize) -> Result<ResearchResponse> {
        let search_config = SearchConfig {
            top_k: max_results.max(1),
            ..Default::default()
        };
        let (hits, _) = self
            .retriever
            .search(query, &SearchFilters::default(), &search_config)
            .await?;

        let candidates = group_by_document(hits);
        let total_found = candidates.len();
        info!(query, candidates = total_found, "research candidates retrieved");

        let mut sources = Vec::new();
        let mut claims = Vec::new();
        for candidate in candidates.into_iter().take(SUMMARY_LIMIT) {
            match self.summarize(query, &candidate).await {
                Ok((source, mut source_claims)) => {
                    sources.push(source);
                    claims.append(&mut source_claims);
                }
                Err(e) => {
                    warn!(source = %candidate.id, error = %e, "source summary failed, dropping");
                }
            }
        }

        sources.sort_by(|a, b| {
            b.credibility_score
                .partial_cmp(&a.credibility_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top_sources_for_rag: Vec<String> = sources
            .iter()
            .filter(|s| s.credibility_score >= RAG_CREDIBILITY_THRESHOLD)
            .take(RAG_SOURCE_LIMIT)
            .map(|s| s.id.clone())
            .collect();

        let synthesis = self.synthesize(query, &sources).await;

        info!(
            sources = sources.len(),
            recommended = top_sources_for_rag.len(),
            claims = claims.len(),
            "research complete"
        );
        Ok(ResearchResponse {
            sources,
            synthesis,
            claims,
            top_sources_for_rag,
            total_found,
        })
    }

    /// Summarizes one source via the voting engine.
    async fn summarize(
        &self,
        query: &str,
        candidate: &SourceCandidate,
    ) -> Result<(ResearchSource, Vec<Claim>)> {
        let prompt = format!(
            "Query: {query}\n\nSource \"{}\":\n{}\n\n\
             Summarize this source's relevance to the query and rate its credibility.\n\
             Return {{\"summary\": ..., \"credibility_score\": 0.0-1.0, \
             \"claims\": [\"factual claim\", ...]}}.",
            candidate.title, candidate.snippet,
        );
        let input = TaskInput::new(prompt)
            .with_system("You are a careful research analyst. Return only valid JSON.")
            .with_model(&self.model)
            .with_temperature(0.2)
            .with_max_tokens(1200);

        let output: SummaryOutput = first_to_ahead_by_k(
            &input,
            self.sampler.as_ref(),
            parse_last_json,
            &self.config,
            &self.cancel,
        )
        .await?;

        let claims = output
            .claims
            .into_iter()
            .map(|text| Claim {
                text,
                sources: vec![candidate.id.clone()],
            })
            .collect();

        let source = ResearchSource {
            id: candidate.id.clone(),
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            snippet: candidate.snippet.clone(),
            summary: output.summary,
            credibility_score: output.credibility_score.clamp(0.0, 1.0),
            source_type: candidate.source_type.clone(),
        };
        Ok((source, claims))
    }

    /// Cross-source synthesis; one plain sample, failure degrades to a
    /// fixed notice rather than failing the research.
    async fn synthesize(&self, query: &str, sources: &[ResearchSource]) -> String {
        if sources.is_empty() {
            return "No sources found in memory for this query.".to_string();
        }

        let mut prompt = format!("Synthesize an answer to \"{query}\" from these sources:\n");
        for (i, source) in sources.iter().take(15).enumerate() {
            prompt.push_str(&format!(
                "{}. {} (credibility {:.2}): {}\n",
                i + 1,
                source.title,
                source.credibility_score,
                source.summary,
            ));
        }
        let input = TaskInput::new(prompt)
            .with_system("You are a research synthesizer. Highlight the most credible sources.")
            .with_model(&self.model)
            .with_temperature(0.3)
            .with_max_tokens(1500);

        match self.sampler.sample(&input).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "synthesis generation failed");
                "Synthesis generation failed. Please review individual sources.".to_string()
            }
        }
    }
}

/// A document-level research candidate assembled from its best hits.
struct SourceCandidate {
    id: String,
    title: String,
    url: Option<String>,
    snippet: String,
    source_type: String,
}

/// Groups hits by document, keeping retrieval order and joining the top
/// passages into one snippet.
fn group_by_document(hits: Vec<SearchHit>) -> Vec<SourceCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut candidates: std::collections::HashMap<String, SourceCandidate> =
        std::collections::HashMap::new();

    for hit in hits {
        if let Some(existing) = candidates.get_mut(&hit.document_id) {
            if existing.snippet.len() < 2000 {
                existing.snippet.push_str("\n...\n");
                existing.snippet.push_str(&hit.text);
            }
        } else {
            order.push(hit.document_id.clone());
            candidates.insert(
                hit.document_id.clone(),
                SourceCandidate {
                    id: hit.document_id.clone(),
                    title: hit.provenance.file_name.clone(),
                    url: hit.provenance.drive_link.clone(),
                    snippet: hit.text,
                    source_type: hit.provenance.source,
                },
            );
        }
    }

    order
        .into_iter()
        .filter_map(|id| candidates.remove(&id))
        .collect()
}
