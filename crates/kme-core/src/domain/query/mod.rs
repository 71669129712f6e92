//! Ranked retrieval over a lexical index
//!
//! A query runs in two phases:
//!
//! 1. **Candidates** come from the index alone: every entry sharing a keyword
//!    or phrase with the query, with its keyword overlap and Jaccard score.
//!    This is what the [`QueryCache`] stores.
//! 2. **Ranking** looks each candidate up in the store, drops filtered or
//!    rejected entries, and adds the confidence and utility components using
//!    the entry's current values.
//!
//! Hits come out by descending relevance, with one exception: a hit never
//! lands below a hit it dominates, meaning one that matches more query
//! keywords at equal or higher confidence. The relevance components alone
//! cannot promise that (the utility bonus outweighs a single keyword).

pub mod cache;
pub mod scoring;

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::domain::index::{LexicalIndex, extract_keywords, extract_phrases, jaccard, keyword_set, pair_key};
use crate::domain::knowledge::{KnowledgeCategory, KnowledgeEntry};

pub use cache::{CacheStats, QueryCache};
pub use scoring::RelevanceBreakdown;

/// Query keywords paired up into co-occurrence phrase lookups
const PAIRED_KEYWORDS: usize = 10;

/// A retrieval request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeQuery {
    pub text: String,
    pub category: Option<KnowledgeCategory>,
    pub min_confidence: Option<u8>,
    pub max_results: Option<usize>,
}

impl KnowledgeQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: KnowledgeCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_min_confidence(mut self, min: u8) -> Self {
        self.min_confidence = Some(min.min(100));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.max_results = Some(limit);
        self
    }

    fn admits(&self, entry: &KnowledgeEntry) -> bool {
        entry.is_live()
            && self.category.is_none_or(|c| entry.category == c)
            && self.min_confidence.is_none_or(|m| entry.confidence_score >= m)
    }
}

/// Query text reduced to what candidate generation needs
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// Cache key: lowercase keywords in rank order
    pub normalized: String,
    pub keywords: Vec<String>,
    pub keyword_set: HashSet<String>,
    /// Direct phrases plus sorted keyword pairs
    pub phrases: Vec<String>,
}

impl ParsedQuery {
    pub fn parse(text: &str, max_keywords: usize, max_phrases: usize) -> Self {
        let keywords = extract_keywords(text, max_keywords);
        let keyword_set = keyword_set(&keywords);

        let mut phrases = extract_phrases(text, max_phrases);
        let leading: Vec<&String> = keywords.iter().take(PAIRED_KEYWORDS).collect();
        for (i, a) in leading.iter().enumerate() {
            for b in &leading[i + 1..] {
                phrases.push(pair_key(a, b));
            }
        }
        phrases.sort();
        phrases.dedup();

        Self {
            normalized: keywords.join(" "),
            keywords,
            keyword_set,
            phrases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Index-only match data for one entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
    pub id: Uuid,
    /// Query keywords present among the entry's keywords
    pub matched: usize,
    pub jaccard: f64,
}

/// Every entry in `index` sharing a keyword or phrase with `query`, by ordinal
pub fn candidates(index: &LexicalIndex, query: &ParsedQuery) -> Vec<Candidate> {
    let mut matched: BTreeMap<u32, usize> = BTreeMap::new();

    for keyword in &query.keywords {
        for ordinal in index.keyword_hits(keyword) {
            *matched.entry(*ordinal).or_default() += 1;
        }
    }
    for phrase in &query.phrases {
        for ordinal in index.phrase_hits(phrase) {
            matched.entry(*ordinal).or_default();
        }
    }

    matched
        .into_iter()
        .filter_map(|(ordinal, matched)| {
            let id = index.id_of(ordinal)?;
            let entry_keywords = keyword_set(index.keywords_of(ordinal));
            Some(Candidate {
                id,
                matched,
                jaccard: jaccard(&query.keyword_set, &entry_keywords),
            })
        })
        .collect()
}

/// One ranked result
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub entry: KnowledgeEntry,
    /// Query keywords the entry carries
    pub matched: usize,
    pub relevance: f64,
    pub breakdown: RelevanceBreakdown,
}

/// Score, filter and order `candidates`, keeping at most `limit`
///
/// Ties on relevance go to the most recently accessed entry, then to id.
/// Dominated hits are held back until their dominators are placed.
pub fn rank<'a>(
    query: &ParsedQuery,
    request: &KnowledgeQuery,
    candidates: &[Candidate],
    limit: usize,
    lookup: impl Fn(&Uuid) -> Option<&'a KnowledgeEntry>,
) -> Vec<QueryHit> {
    let query_len = query.keywords.len().max(1) as f64;

    let mut hits: Vec<QueryHit> = candidates
        .iter()
        .filter_map(|candidate| {
            let entry = lookup(&candidate.id)?;
            if !request.admits(entry) {
                return None;
            }
            let breakdown = RelevanceBreakdown::compute(
                candidate.matched as f64 / query_len,
                candidate.jaccard,
                entry.confidence_score,
                entry.utility_score,
            );
            Some(QueryHit {
                entry: entry.clone(),
                matched: candidate.matched,
                relevance: breakdown.total(),
                breakdown,
            })
        })
        .collect();

    hits.sort_by(compare_hits);
    place_dominators_first(hits, limit)
}

/// Take hits in relevance order, skipping any hit that a remaining hit
/// dominates. Each step picks the most relevant undominated hit.
fn place_dominators_first(mut hits: Vec<QueryHit>, limit: usize) -> Vec<QueryHit> {
    let mut placed = Vec::with_capacity(limit.min(hits.len()));

    while placed.len() < limit && !hits.is_empty() {
        // best[m]: highest confidence among hits matching at least m keywords
        let top = hits.iter().map(|h| h.matched).max().unwrap_or(0);
        let mut best: Vec<Option<u8>> = vec![None; top + 2];
        for hit in &hits {
            best[hit.matched] = best[hit.matched].max(Some(hit.entry.confidence_score));
        }
        for m in (0..=top).rev() {
            best[m] = best[m].max(best[m + 1]);
        }

        let pick = hits
            .iter()
            .position(|h| best[h.matched + 1].is_none_or(|c| c < h.entry.confidence_score))
            .unwrap_or(0);
        placed.push(hits.remove(pick));
    }
    placed
}

fn compare_hits(a: &QueryHit, b: &QueryHit) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.entry.last_accessed.cmp(&a.entry.last_accessed))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}
