//! Keyword and phrase indices
//!
//! A `LexicalIndex` is derived entirely from the live entries of a store and
//! can be rebuilt from scratch at any time. Postings refer to ordinals in the
//! index's own `ids` table, so an index is only meaningful alongside the
//! generation that built it.
//!
//! ```text
//! ids:      [e0, e1, e2, ...]            ordinal -> entry id
//! inverted: "battery" -> [0, 2]          keyword -> ordinals
//! phrases:  "battery optimization" -> [0, 2]
//!           (direct phrases plus keyword pairs shared by >= N entries)
//! ```

pub mod keywords;
pub mod phrases;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::domain::knowledge::KnowledgeEntry;

pub use keywords::{extract_keywords, jaccard, keyword_set, tokenize};
pub use phrases::{extract_phrases, pair_key};

/// Keywords of each entry that feed co-occurrence counting
const COOCCURRENCE_KEYWORDS: usize = 20;

/// Tunables for index construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexSettings {
    pub max_keywords: usize,
    pub max_phrases: usize,
    pub cooccurrence_min_entries: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for IndexSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            max_keywords: config.max_keywords,
            max_phrases: config.max_phrases,
            cooccurrence_min_entries: config.cooccurrence_min_entries,
        }
    }
}

/// Counts reported by a build and stored in snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub entries: usize,
    pub keywords: usize,
    pub phrases: usize,
    pub cooccurrence_phrases: usize,
}

/// Inverted keyword index plus phrase index over one set of entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexicalIndex {
    /// Store version the index was built from
    pub store_version: u64,
    pub ids: Vec<Uuid>,
    /// Ranked keywords per ordinal
    pub keywords: Vec<Vec<String>>,
    pub inverted: HashMap<String, Vec<u32>>,
    pub phrases: HashMap<String, Vec<u32>>,
    pub counts: IndexCounts,
}

impl LexicalIndex {
    /// Build over `entries`; rejected entries are skipped
    pub fn build<'a>(
        entries: impl IntoIterator<Item = &'a KnowledgeEntry>,
        settings: &IndexSettings,
        store_version: u64,
    ) -> Self {
        let mut index = Self {
            store_version,
            ..Self::default()
        };

        let mut pair_postings: HashMap<String, Vec<u32>> = HashMap::new();

        for entry in entries.into_iter().filter(|e| e.is_live()) {
            let ordinal = index.ids.len() as u32;
            let keywords = extract_keywords(&entry.content, settings.max_keywords);

            for keyword in &keywords {
                index.inverted.entry(keyword.clone()).or_default().push(ordinal);
            }

            for phrase in extract_phrases(&entry.content, settings.max_phrases) {
                index.phrases.entry(phrase).or_default().push(ordinal);
            }

            let head: BTreeSet<&String> = keywords.iter().take(COOCCURRENCE_KEYWORDS).collect();
            let head: Vec<&String> = head.into_iter().collect();
            for (i, a) in head.iter().enumerate() {
                for b in &head[i + 1..] {
                    pair_postings.entry(pair_key(a, b)).or_default().push(ordinal);
                }
            }

            index.ids.push(entry.id);
            index.keywords.push(keywords);
        }

        let direct_phrases = index.phrases.len();
        let min_entries = settings.cooccurrence_min_entries.max(1);
        for (pair, ordinals) in pair_postings {
            if ordinals.len() < min_entries {
                continue;
            }
            let postings = index.phrases.entry(pair).or_default();
            postings.extend(ordinals);
            postings.sort_unstable();
            postings.dedup();
        }

        index.counts = IndexCounts {
            entries: index.ids.len(),
            keywords: index.inverted.len(),
            phrases: index.phrases.len(),
            cooccurrence_phrases: index.phrases.len() - direct_phrases,
        };
        index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_of(&self, ordinal: u32) -> Option<Uuid> {
        self.ids.get(ordinal as usize).copied()
    }

    pub fn keywords_of(&self, ordinal: u32) -> &[String] {
        self.keywords
            .get(ordinal as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn keyword_hits(&self, keyword: &str) -> &[u32] {
        self.inverted.get(keyword).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn phrase_hits(&self, phrase: &str) -> &[u32] {
        self.phrases.get(phrase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when the index covers exactly these ids in this order
    pub fn matches_ids(&self, ids: &[Uuid]) -> bool {
        self.ids == ids
    }
}
