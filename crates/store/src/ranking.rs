//! BM25F-style relevance scoring
//!
//! ```text
//! score(doc) = boost(doc) × Σ_terms Σ_fields weight(f) × idf(t) × tf·(k1+1) / (tf + k1·(1 − b + b·len/avglen))
//! idf(t)     = ln(1 + (N − df + 0.5) / (df + 0.5))
//! ```
//!
//! Phrases use their occurrence count as `tf` and the sum of their terms' idf.

use quarry_core::RankingConfig;
use std::collections::HashMap;

/// Collection-wide statistics read once per query
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    /// Number of documents in the index
    pub doc_count: u64,
    /// Average indexed length per field id
    pub avg_len: HashMap<i64, f64>,
}

impl CollectionStats {
    /// Average length of a field; an empty field counts as length 1
    pub fn avg_len(&self, field_id: i64) -> f64 {
        match self.avg_len.get(&field_id) {
            Some(&avg) if avg > 0.0 => avg,
            _ => 1.0,
        }
    }
}

/// BM25 scorer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25 {
    /// Term frequency saturation (default: 1.2)
    pub k1: f64,
    /// Length normalization strength (default: 0.75)
    pub b: f64,
}

impl Default for Bm25 {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl Bm25 {
    pub fn from_config(config: &RankingConfig) -> Self {
        Self { k1: config.k1, b: config.b }
    }

    /// Inverse document frequency, always positive
    pub fn idf(doc_count: u64, doc_freq: u64) -> f64 {
        let n = doc_count.max(doc_freq) as f64;
        let df = doc_freq as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Contribution of one term (or phrase) in one field
    pub fn score(&self, tf: f64, idf: f64, weight: f64, len: f64, avg_len: f64) -> f64 {
        if tf <= 0.0 {
            return 0.0;
        }

        let avg_len = if avg_len > 0.0 { avg_len } else { 1.0 };
        let norm = self.k1 * (1.0 - self.b + self.b * len / avg_len);
        weight * idf * tf * (self.k1 + 1.0) / (tf + norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_idf_prefers_rare_terms() {
        assert!(Bm25::idf(100, 1) > Bm25::idf(100, 50));
        assert!(Bm25::idf(100, 100) > 0.0);
        assert!(Bm25::idf(1, 1) > 0.0);
    }

    #[test]
    fn test_missing_term_scores_zero() {
        assert_eq!(Bm25::default().score(0.0, 2.0, 1.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_weight_scales_linearly() {
        let bm25 = Bm25::default();
        let one = bm25.score(2.0, 1.5, 1.0, 8.0, 10.0);
        let two = bm25.score(2.0, 1.5, 2.0, 8.0, 10.0);
        assert!((two - 2.0 * one).abs() < 1e-12);
    }

    #[test]
    fn test_shorter_fields_score_higher() {
        let bm25 = Bm25::default();
        assert!(bm25.score(1.0, 1.0, 1.0, 3.0, 10.0) > bm25.score(1.0, 1.0, 1.0, 30.0, 10.0));
    }

    #[test]
    fn test_zero_average_length() {
        let bm25 = Bm25::default();
        assert_eq!(bm25.score(1.0, 1.0, 1.0, 1.0, 0.0), bm25.score(1.0, 1.0, 1.0, 1.0, 1.0));
        assert_eq!(CollectionStats::default().avg_len(3), 1.0);
    }

    proptest! {
        #[test]
        fn score_is_monotonic_in_tf(tf in 1u32..200, extra in 1u32..50, len in 1u32..500, avg in 1u32..500) {
            let bm25 = Bm25::default();
            let low = bm25.score(f64::from(tf), 1.0, 1.0, f64::from(len), f64::from(avg));
            let high = bm25.score(f64::from(tf + extra), 1.0, 1.0, f64::from(len), f64::from(avg));
            prop_assert!(high >= low);
        }

        #[test]
        fn score_is_monotonic_in_idf(tf in 1u32..50, a in 0.0f64..10.0, b in 0.0f64..10.0) {
            let bm25 = Bm25::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(bm25.score(f64::from(tf), hi, 1.0, 5.0, 5.0) >= bm25.score(f64::from(tf), lo, 1.0, 5.0, 5.0));
        }
    }
}
