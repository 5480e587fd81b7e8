//! Reciprocal Rank Fusion (RRF).
//!
//! Combines multiple ranked lists into a single fused ranking.
//! Based on: Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods"

use std::collections::HashMap;
use std::hash::Hash;

/// Configuration for the RRF algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The constant added to ranks; higher values flatten the contribution
    /// of top-ranked items. 60 is the value recommended in the original
    /// paper.
    pub c: u32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { c: 60 }
    }
}

impl RrfConfig {
    /// Creates a config with the specified constant.
    #[must_use]
    pub const fn new(c: u32) -> Self {
        Self { c }
    }
}

/// Fuses ranked lists: `score(d) = Σ 1 / (c + rank(d))` over the lists that
/// contain `d` (1-based ranks). Missing arms contribute 0.
///
/// Returns `(item, fused_score)` pairs sorted by score descending.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn reciprocal_rank_fusion<K>(ranked_lists: &[&[K]], config: &RrfConfig) -> Vec<(K, f64)>
where
    K: Eq + Hash + Clone,
{
    let mut scores: HashMap<K, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, item) in list.iter().enumerate() {
            // rank is 0-indexed; the formula uses 1-indexed ranks.
            let rrf_score = 1.0 / f64::from(config.c + (rank as u32) + 1);
            *scores.entry(item.clone()).or_insert(0.0) += rrf_score;
        }
    }

    let mut results: Vec<(K, f64)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrf_single_list() {
        let list = vec![1, 2, 3];
        let results = reciprocal_rank_fusion(&[&list], &RrfConfig::default());

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 > results[1].1);
        assert!(results[1].1 > results[2].1);
    }

    #[test]
    fn test_rrf_score_formula() {
        let list = vec!["only"];
        let results = reciprocal_rank_fusion(&[&list], &RrfConfig::new(60));
        let expected = 1.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_combined_score() {
        let list1 = vec!["a"];
        let list2 = vec!["a"];
        let results = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::new(60));
        let expected = 2.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_disjoint_lists() {
        let list1 = vec![1, 2];
        let list2 = vec![3, 4];
        let results = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::default());

        assert_eq!(results.len(), 4);
        let score1 = results.iter().find(|(id, _)| *id == 1).unwrap().1;
        let score3 = results.iter().find(|(id, _)| *id == 3).unwrap().1;
        assert!((score1 - score3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_empty_lists() {
        let list: Vec<i64> = vec![];
        let results = reciprocal_rank_fusion(&[&list], &RrfConfig::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_rrf_c_parameter() {
        let list = vec![1, 2];
        let results_low = reciprocal_rank_fusion(&[&list], &RrfConfig::new(1));
        let results_high = reciprocal_rank_fusion(&[&list], &RrfConfig::new(100));

        // With a low constant the gap between ranks is larger.
        let diff_low = results_low[0].1 - results_low[1].1;
        let diff_high = results_high[0].1 - results_high[1].1;
        assert!(diff_low > diff_high);
    }

    #[test]
    fn test_rrf_string_keys() {
        let list1 = vec!["doc-1#0".to_string(), "doc-2#1".to_string()];
        let list2 = vec!["doc-2#1".to_string()];
        let results = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::default());

        // The item present in both arms wins.
        assert_eq!(results[0].0, "doc-2#1");
    }

    #[test]
    fn test_both_arms_contribute_non_negatively() {
        // Fused score with two arms is never below the score from either
        // arm alone.
        let list1 = vec![1, 2, 3, 4];
        let list2 = vec![4, 3, 2, 1];
        let config = RrfConfig::default();

        let both = reciprocal_rank_fusion(&[&list1, &list2], &config);
        let only1 = reciprocal_rank_fusion(&[&list1], &config);
        let only2 = reciprocal_rank_fusion(&[&list2], &config);

        for (item, fused) in &both {
            let s1 = only1.iter().find(|(i, _)| i == item).map_or(0.0, |(_, s)| *s);
            let s2 = only2.iter().find(|(i, _)| i == item).map_or(0.0, |(_, s)| *s);
            assert!(*fused >= s1);
            assert!(*fused >= s2);
            assert!((fused - (s1 + s2)).abs() < 1e-12);
        }
    }
}
