//! Relationship graph and semantic clusters
//!
//! The graph is a sparse symmetric adjacency over live entries:
//!
//! ```text
//! ordinal -> { neighbour ordinal -> strength in [min_edge_strength, 1] }
//! ```
//!
//! Building it is O(n^2) in the number of entries and is a batch operation,
//! never part of ingest. Pair scoring is spread over rayon's pool.

pub mod cluster;
pub mod relationship;

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::domain::index::{extract_keywords, keyword_set};
use crate::domain::knowledge::KnowledgeEntry;

pub use cluster::{SemanticCluster, detect_clusters};
pub use relationship::{RelationshipWeights, StrengthBreakdown, context_similarity, strength_breakdown, temporal_proximity};

/// Graph and cluster tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphSettings {
    pub max_keywords: usize,
    pub min_edge_strength: f64,
    pub cluster_edge_threshold: f64,
    pub cluster_min_neighbors: usize,
    pub weights: RelationshipWeights,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for GraphSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            max_keywords: config.max_keywords,
            min_edge_strength: config.min_edge_strength,
            cluster_edge_threshold: config.cluster_edge_threshold,
            cluster_min_neighbors: config.cluster_min_neighbors,
            weights: RelationshipWeights::default(),
        }
    }
}

/// Sparse weighted adjacency between entries
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    /// Store version the graph was built from
    pub store_version: u64,
    ids: Vec<Uuid>,
    ordinals: HashMap<Uuid, u32>,
    keywords: Vec<Vec<String>>,
    adjacency: Vec<BTreeMap<u32, f64>>,
    edge_count: usize,
}

impl RelationshipGraph {
    /// Score every unordered pair of live entries and keep edges at or
    /// above `min_edge_strength`
    pub fn build(entries: &[KnowledgeEntry], settings: &GraphSettings, store_version: u64) -> Self {
        let live: Vec<&KnowledgeEntry> = entries.iter().filter(|e| e.is_live()).collect();

        let keywords: Vec<Vec<String>> = live
            .par_iter()
            .map(|e| extract_keywords(&e.content, settings.max_keywords))
            .collect();
        let sets: Vec<HashSet<String>> = keywords.par_iter().map(|k| keyword_set(k)).collect();

        let n = live.len();
        let edges: Vec<(u32, u32, f64)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let live = &live;
                let sets = &sets;
                (i + 1..n).filter_map(move |j| {
                    let strength = strength_breakdown(live[i], &sets[i], live[j], &sets[j])
                        .combined(&settings.weights);
                    (strength >= settings.min_edge_strength).then_some((i as u32, j as u32, strength))
                })
            })
            .collect();

        let mut adjacency = vec![BTreeMap::new(); n];
        for (i, j, strength) in &edges {
            adjacency[*i as usize].insert(*j, *strength);
            adjacency[*j as usize].insert(*i, *strength);
        }

        let ids: Vec<Uuid> = live.iter().map(|e| e.id).collect();
        let ordinals = ids.iter().enumerate().map(|(i, id)| (*id, i as u32)).collect();

        Self {
            store_version,
            ids,
            ordinals,
            keywords,
            adjacency,
            edge_count: edges.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Undirected edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn id_of(&self, ordinal: u32) -> Option<Uuid> {
        self.ids.get(ordinal as usize).copied()
    }

    pub fn ordinal_of(&self, id: &Uuid) -> Option<u32> {
        self.ordinals.get(id).copied()
    }

    pub fn keywords_of(&self, ordinal: u32) -> &[String] {
        self.keywords
            .get(ordinal as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn neighbors(&self, ordinal: u32) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.adjacency
            .get(ordinal as usize)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|(n, s)| (*n, *s)))
    }

    pub fn strength(&self, a: u32, b: u32) -> Option<f64> {
        self.adjacency.get(a as usize)?.get(&b).copied()
    }

    /// Neighbours of `id`, strongest first
    pub fn neighbors_of(&self, id: &Uuid) -> Vec<(Uuid, f64)> {
        let Some(ordinal) = self.ordinal_of(id) else {
            return Vec::new();
        };
        let mut neighbors: Vec<(Uuid, f64)> = self
            .neighbors(ordinal)
            .filter_map(|(n, s)| self.id_of(n).map(|id| (id, s)))
            .collect();
        neighbors.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        neighbors
    }

    /// Clusters with the thresholds in `settings`
    pub fn clusters(&self, settings: &GraphSettings) -> Vec<SemanticCluster> {
        detect_clusters(self, settings.cluster_edge_threshold, settings.cluster_min_neighbors)
    }
}
