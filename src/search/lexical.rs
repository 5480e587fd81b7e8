//! Lexical scoring arm.
//!
//! A BM25-lite surrogate: lowercase-tokenize the query and score each chunk
//! by the summed term frequencies in its text. Scoring is pure CPU work and
//! runs in parallel across chunks.

use rayon::prelude::*;

use crate::core::ChunkRecord;

/// Lowercase query tokens, punctuation stripped.
#[must_use]
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scores chunks by summed term frequency, descending, zero scores dropped.
///
/// Returns `(chunk_key, score)` pairs.
#[must_use]
pub fn score_chunks(query: &str, chunks: &[ChunkRecord]) -> Vec<(String, f64)> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    #[allow(clippy::cast_precision_loss)]
    let mut scored: Vec<(String, f64)> = chunks
        .par_iter()
        .filter_map(|chunk| {
            let text = chunk.text.to_lowercase();
            let score: usize = terms
                .iter()
                .map(|term| text.matches(term.as_str()).count())
                .sum();
            (score > 0).then(|| (chunk.key(), score as f64))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, index: usize, text: &str) -> ChunkRecord {
        ChunkRecord::new(id, index, text, (0, 1), 0)
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(query_terms("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(query_terms("  "), Vec::<String>::new());
        assert_eq!(query_terms("a-b c_d"), vec!["a", "b", "c_d"]);
    }

    #[test]
    fn test_term_frequency_ranking() {
        let chunks = vec![
            chunk("d1", 0, "the fox jumps over the fox"),
            chunk("d2", 0, "one fox only"),
            chunk("d3", 0, "nothing relevant"),
        ];

        let scored = score_chunks("fox", &chunks);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].0, "d1#0");
        assert!(scored[0].1 > scored[1].1);
    }

    #[test]
    fn test_case_insensitive() {
        let chunks = vec![chunk("d1", 0, "SENTINEL value")];
        let scored = score_chunks("sentinel", &chunks);
        assert_eq!(scored.len(), 1);
    }

    #[test]
    fn test_multi_term_sums() {
        let chunks = vec![
            chunk("d1", 0, "alpha beta"),
            chunk("d2", 0, "alpha alpha"),
        ];
        let scored = score_chunks("alpha beta", &chunks);
        // d1: 1 + 1 = 2, d2: 2 + 0 = 2 - both match with equal score.
        assert_eq!(scored.len(), 2);
        assert!((scored[0].1 - scored[1].1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_query() {
        let chunks = vec![chunk("d1", 0, "text")];
        assert!(score_chunks("", &chunks).is_empty());
        assert!(score_chunks("!!!", &chunks).is_empty());
    }
}
