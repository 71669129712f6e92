//! Relevance rubric
//!
//! | component           | range | driven by                                   |
//! |---------------------|-------|---------------------------------------------|
//! | keyword_match       | 0-40  | fraction of query keywords the entry has    |
//! | semantic_similarity | 0-30  | Jaccard of query and entry keyword sets     |
//! | confidence_bonus    | 0-20  | stored confidence                           |
//! | utility_bonus       | 0-10  | stored utility, saturating at 100           |

use serde::Serialize;

pub const KEYWORD_MATCH_MAX: f64 = 40.0;
pub const SEMANTIC_MAX: f64 = 30.0;
pub const CONFIDENCE_MAX: f64 = 20.0;
pub const UTILITY_MAX: f64 = 10.0;

/// Utility at which the bonus saturates
const UTILITY_CEILING: u8 = 100;

/// Per-component relevance, summing to at most 100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RelevanceBreakdown {
    pub keyword_match: f64,
    pub semantic_similarity: f64,
    pub confidence_bonus: f64,
    pub utility_bonus: f64,
}

impl RelevanceBreakdown {
    pub fn compute(overlap_fraction: f64, jaccard: f64, confidence: u8, utility: u8) -> Self {
        Self {
            keyword_match: KEYWORD_MATCH_MAX * overlap_fraction.clamp(0.0, 1.0),
            semantic_similarity: SEMANTIC_MAX * jaccard.clamp(0.0, 1.0),
            confidence_bonus: CONFIDENCE_MAX * f64::from(confidence.min(100)) / 100.0,
            utility_bonus: UTILITY_MAX * f64::from(utility.min(UTILITY_CEILING))
                / f64::from(UTILITY_CEILING),
        }
    }

    pub fn total(&self) -> f64 {
        (self.keyword_match + self.semantic_similarity + self.confidence_bonus + self.utility_bonus).min(100.0)
    }
}
