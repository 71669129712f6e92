//! Pairwise relationship strength
//!
//! `strength = 0.4 * keyword_jaccard + 0.2 * same_category
//!           + 0.3 * context_similarity + 0.1 * temporal_proximity`,
//! capped at 1.0. Purely lexical and metadata based.

use chrono::Duration;
use std::collections::HashSet;

use crate::domain::index::jaccard;
use crate::domain::knowledge::{EntryContext, KnowledgeEntry};

/// Window over which temporal proximity decays to zero
pub const TEMPORAL_WINDOW_DAYS: i64 = 7;

/// Weights of the strength components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationshipWeights {
    pub keyword: f64,
    pub category: f64,
    pub context: f64,
    pub temporal: f64,
}

impl Default for RelationshipWeights {
    fn default() -> Self {
        Self {
            keyword: 0.4,
            category: 0.2,
            context: 0.3,
            temporal: 0.1,
        }
    }
}

/// Component scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StrengthBreakdown {
    pub keyword: f64,
    pub category: f64,
    pub context: f64,
    pub temporal: f64,
}

impl StrengthBreakdown {
    pub fn combined(&self, weights: &RelationshipWeights) -> f64 {
        (weights.keyword * self.keyword
            + weights.category * self.category
            + weights.context * self.context
            + weights.temporal * self.temporal)
            .min(1.0)
    }
}

/// Mean of the checks over context fields both sides populate; 0 if none
pub fn context_similarity(a: &EntryContext, b: &EntryContext) -> f64 {
    let mut total = 0.0;
    let mut fields = 0u32;

    if let (Some(x), Some(y)) = (&a.emotional_label, &b.emotional_label) {
        total += if x == y { 1.0 } else { 0.0 };
        fields += 1;
    }
    if let (Some(x), Some(y)) = (a.trust_level, b.trust_level) {
        total += 1.0 - f64::from(x.abs_diff(y)) / 100.0;
        fields += 1;
    }
    if let (Some(x), Some(y)) = (&a.sensor_payload, &b.sensor_payload) {
        total += if x == y { 1.0 } else { 0.0 };
        fields += 1;
    }

    if fields == 0 { 0.0 } else { total / f64::from(fields) }
}

/// `1 - min(dt, 7 days) / 7 days`
pub fn temporal_proximity(a: &KnowledgeEntry, b: &KnowledgeEntry) -> f64 {
    let window = Duration::days(TEMPORAL_WINDOW_DAYS).num_milliseconds() as f64;
    let delta = (a.timestamp - b.timestamp).num_milliseconds().unsigned_abs() as f64;
    1.0 - delta.min(window) / window
}

pub fn strength_breakdown(
    a: &KnowledgeEntry,
    a_keywords: &HashSet<String>,
    b: &KnowledgeEntry,
    b_keywords: &HashSet<String>,
) -> StrengthBreakdown {
    StrengthBreakdown {
        keyword: jaccard(a_keywords, b_keywords),
        category: if a.category == b.category { 1.0 } else { 0.0 },
        context: context_similarity(&a.context, &b.context),
        temporal: temporal_proximity(a, b),
    }
}
