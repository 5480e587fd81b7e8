//! Claim verification worker.
//!
//! Two distinct reliability patterns live here. `verify_claims` wraps one
//! prompt in the sequential voting engine (the default path). The panel
//! mode instead fans out N parallel verifiers, each casting one vote, and
//! reduces them by majority with a confidence-weighted tiebreak.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::capability::{Sampler, TaskInput};
use crate::error::{Error, Result};
use crate::maker::{CancelToken, MakerConfig, first_to_ahead_by_k, parse_last_json};

/// Raw-output cap for verification votes (long outputs correlate with
/// hallucinated evidence).
const VERIFY_RAW_CAP: usize = 800;

/// Verdict for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Evidence supports the claim.
    Supported,
    /// Evidence contradicts the claim.
    Contradicted,
    /// Evidence both supports and contradicts the claim.
    Mixed,
    /// Not enough evidence either way.
    Insufficient,
}

/// Verification outcome for one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Claim identifier (caller-supplied or positional).
    pub claim_id: String,
    /// The verdict.
    pub verdict: Verdict,
    /// Confidence in the verdict, 0.0 to 1.0.
    pub confidence: f64,
    /// Supporting evidence entries ({url, snippet, title}).
    #[serde(default)]
    pub evidence: Vec<Value>,
    /// Why the verdict was reached.
    pub rationale: String,
}

/// The typed result MAKER validates for this worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// One result per input claim.
    pub results: Vec<VerificationResult>,
}

/// One vote from a panel verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelVote {
    /// Whether this verifier accepts the content.
    pub vote: bool,
    /// Verifier confidence, 0.0 to 1.0.
    pub confidence: f64,
    /// Verifier reasoning.
    #[serde(default)]
    pub reasoning: String,
}

/// Consensus across a verifier panel.
#[derive(Debug, Clone, Serialize)]
pub struct PanelConsensus {
    /// Majority outcome (confidence-weighted on ties).
    pub verified: bool,
    /// Winning side's share of total confidence.
    pub confidence: f64,
    /// Fraction of verifiers agreeing with the outcome.
    pub agreement_rate: f64,
    /// Individual votes.
    pub votes: Vec<PanelVote>,
}

/// Fact-checking worker wrapping the voting engine.
pub struct Verifier {
    sampler: Arc<dyn Sampler>,
    config: MakerConfig,
    model: String,
    cancel: CancelToken,
}

impl Verifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(
        sampler: Arc<dyn Sampler>,
        config: MakerConfig,
        model: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            sampler,
            config: config.max_raw_len(VERIFY_RAW_CAP),
            model: model.into(),
            cancel,
        }
    }

    /// Verifies claims with first-to-ahead-by-k voting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConvergence`] when voting fails to decide, or a
    /// propagated sampler error.
    pub async fn verify_claims(&self, claims: &[Value]) -> Result<VerificationReport> {
        if claims.is_empty() {
            return Ok(VerificationReport {
                results: Vec::new(),
            });
        }

        info!(claims = claims.len(), "verifying claims");
        let input = self.task_input(claims);
        let report: VerificationReport = first_to_ahead_by_k(
            &input,
            self.sampler.as_ref(),
            parse_last_json,
            &self.config,
            &self.cancel,
        )
        .await?;

        info!(results = report.results.len(), "verification complete");
        Ok(report)
    }

    /// Verifies content with N parallel verifiers reduced by consensus.
    ///
    /// # Errors
    ///
    /// Returns an error when every verifier fails.
    pub async fn verify_panel(&self, claims: &[Value], num_verifiers: usize) -> Result<PanelConsensus> {
        let num_verifiers = num_verifiers.max(1);
        info!(num_verifiers, "running verifier panel");

        let input = self.panel_input(claims);
        let votes = join_all((0..num_verifiers).map(|_| {
            let input = input.clone();
            async move {
                let raw = self.sampler.sample(&input).await?;
                parse_last_json::<PanelVote>(&raw)
            }
        }))
        .await;

        let valid: Vec<PanelVote> = votes
            .into_iter()
            .filter_map(|vote| match vote {
                Ok(vote) => Some(vote),
                Err(e) => {
                    warn!(error = %e, "panel verifier discarded");
                    None
                }
            })
            .collect();

        if valid.is_empty() {
            return Err(Error::transient("all panel verifiers failed"));
        }
        Ok(reduce_panel(valid))
    }

    fn task_input(&self, claims: &[Value]) -> TaskInput {
        TaskInput::new(build_verification_prompt(claims))
            .with_system("You are a rigorous fact-checker. Return only valid JSON.")
            .with_model(&self.model)
            .with_temperature(0.1)
            .with_max_tokens(1200)
    }

    fn panel_input(&self, claims: &[Value]) -> TaskInput {
        TaskInput::new(build_verification_prompt(claims))
            .with_system(
                "You are a verification agent. Respond with a JSON object containing: \
                 vote (true/false), confidence (0.0-1.0), and reasoning (string).",
            )
            .with_model(&self.model)
            .with_temperature(0.3)
            .with_max_tokens(500)
    }
}

/// Builds the verification prompt from the claim list.
#[must_use]
pub fn build_verification_prompt(claims: &[Value]) -> String {
    let mut prompt = String::from(
        "Verify the following claims. For each claim return a result with \
         claim_id, verdict (SUPPORTED | CONTRADICTED | MIXED | INSUFFICIENT), \
         confidence, evidence, and rationale, wrapped as {\"results\": [...]}.\n",
    );
    for (i, claim) in claims.iter().enumerate() {
        let text = claim
            .get("text")
            .and_then(Value::as_str)
            .map_or_else(|| claim.to_string(), str::to_string);
        let id = claim
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| format!("claim-{i}"), str::to_string);
        prompt.push_str(&format!("- [{id}] {text}\n"));
        if let Some(sources) = claim.get("sources").and_then(Value::as_array)
            && !sources.is_empty()
        {
            prompt.push_str(&format!("  cited sources: {sources:?}\n"));
        }
    }
    prompt
}

/// Majority vote with confidence-weighted tiebreak.
fn reduce_panel(votes: Vec<PanelVote>) -> PanelConsensus {
    let positive: Vec<&PanelVote> = votes.iter().filter(|v| v.vote).collect();
    let negative_count = votes.len() - positive.len();

    let positive_confidence: f64 = positive.iter().map(|v| v.confidence).sum();
    let negative_confidence: f64 = votes
        .iter()
        .filter(|v| !v.vote)
        .map(|v| v.confidence)
        .sum();
    let total_confidence = positive_confidence + negative_confidence;

    let (verified, confidence) = if positive.len() > negative_count {
        (
            true,
            if total_confidence > 0.0 {
                positive_confidence / total_confidence
            } else {
                0.0
            },
        )
    } else if negative_count > positive.len() {
        (
            false,
            if total_confidence > 0.0 {
                negative_confidence / total_confidence
            } else {
                0.0
            },
        )
    } else {
        // Tie: confidence breaks it.
        (positive_confidence >= negative_confidence, 0.5)
    };

    #[allow(clippy::cast_precision_loss)]
    let agreement_rate = positive.len().max(negative_count) as f64 / votes.len() as f64;

    PanelConsensus {
        verified,
        confidence,
        agreement_rate,
        votes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedSampler(String);

    #[async_trait]
    impl Sampler for FixedSampler {
        async fn sample(&self, _input: &TaskInput) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn verifier(response: &str) -> Verifier {
        Verifier::new(
            Arc::new(FixedSampler(response.to_string())),
            MakerConfig::with_k(2),
            "test-model",
            CancelToken::new(),
        )
    }

    #[tokio::test]
    async fn test_verify_claims_returns_typed_report() {
        let response = json!({
            "results": [{
                "claim_id": "claim-0",
                "verdict": "SUPPORTED",
                "confidence": 0.97,
                "evidence": [{"url": "https://example.com", "snippet": "2+2=4", "title": "math"}],
                "rationale": "basic arithmetic"
            }]
        })
        .to_string();

        let report = verifier(&response)
            .verify_claims(&[json!({"text": "2+2=4"})])
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].verdict, Verdict::Supported);
        assert!(report.results[0].confidence > 0.9);
    }

    #[tokio::test]
    async fn test_empty_claims_short_circuit() {
        // No sampler round is spent on an empty claim list.
        let report = verifier("never parsed").verify_claims(&[]).await.unwrap();
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_panel_majority() {
        let response = json!({"vote": true, "confidence": 0.8, "reasoning": "ok"}).to_string();
        let consensus = verifier(&response)
            .verify_panel(&[json!({"text": "x"})], 3)
            .await
            .unwrap();

        assert!(consensus.verified);
        assert_eq!(consensus.votes.len(), 3);
        assert!((consensus.agreement_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reduce_panel_majority_wins() {
        let consensus = reduce_panel(vec![
            PanelVote { vote: true, confidence: 0.9, reasoning: String::new() },
            PanelVote { vote: true, confidence: 0.7, reasoning: String::new() },
            PanelVote { vote: false, confidence: 0.95, reasoning: String::new() },
        ]);
        assert!(consensus.verified);
        assert!((consensus.agreement_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reduce_panel_tie_uses_confidence() {
        let consensus = reduce_panel(vec![
            PanelVote { vote: true, confidence: 0.4, reasoning: String::new() },
            PanelVote { vote: false, confidence: 0.9, reasoning: String::new() },
        ]);
        assert!(!consensus.verified);
        assert!((consensus.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prompt_includes_claims_and_sources() {
        let prompt = build_verification_prompt(&[
            json!({"id": "c1", "text": "water boils at 100C", "sources": ["doc-9"]}),
            json!({"text": "bare claim"}),
        ]);
        assert!(prompt.contains("[c1] water boils at 100C"));
        assert!(prompt.contains("doc-9"));
        assert!(prompt.contains("[claim-1] bare claim"));
    }

    #[test]
    fn test_verdict_wire_names() {
        assert_eq!(
            serde_json::to_string(&Verdict::Insufficient).unwrap(),
            "\"INSUFFICIENT\""
        );
        let verdict: Verdict = serde_json::from_str("\"MIXED\"").unwrap();
        assert_eq!(verdict, Verdict::Mixed);
    }
}
