//! Semantic clusters
//!
//! Every entry with at least `min_neighbors` neighbours above `edge_threshold`
//! becomes the center of a cluster holding itself plus those neighbours.
//! Clusters are neither merged nor deduplicated, so one entry can sit in
//! several overlapping clusters.

use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::RelationshipGraph;

const THEME_KEYWORDS: usize = 3;

/// A strongly connected neighbourhood around one center entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticCluster {
    pub id: String,
    pub center: Uuid,
    /// Center first, then neighbours by descending edge strength
    pub members: Vec<Uuid>,
    #[serde(skip)]
    pub member_ordinals: Vec<u32>,
    /// Mean strength of the center's edges to the other members
    pub strength: f64,
    /// Most common keywords among members
    pub theme: String,
}

impl SemanticCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.members.contains(id)
    }
}

/// Derive clusters from `graph`, ordered by center ordinal
pub fn detect_clusters(graph: &RelationshipGraph, edge_threshold: f64, min_neighbors: usize) -> Vec<SemanticCluster> {
    let mut clusters = Vec::new();

    for center in 0..graph.len() as u32 {
        let mut strong: Vec<(u32, f64)> = graph
            .neighbors(center)
            .filter(|(_, strength)| *strength > edge_threshold)
            .collect();
        if strong.len() < min_neighbors.max(1) {
            continue;
        }
        strong.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let strength = strong.iter().map(|(_, s)| s).sum::<f64>() / strong.len() as f64;
        let member_ordinals: Vec<u32> = std::iter::once(center)
            .chain(strong.iter().map(|(ordinal, _)| *ordinal))
            .collect();
        let members: Vec<Uuid> = member_ordinals
            .iter()
            .filter_map(|ordinal| graph.id_of(*ordinal))
            .collect();
        let Some(center_id) = graph.id_of(center) else {
            continue;
        };

        clusters.push(SemanticCluster {
            id: format!("cluster-{}", center_id),
            center: center_id,
            theme: theme(graph, &member_ordinals),
            members,
            member_ordinals,
            strength,
        });
    }

    clusters
}

/// Up to three keywords shared by the most members, ties alphabetical
fn theme(graph: &RelationshipGraph, members: &[u32]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for ordinal in members {
        for keyword in graph.keywords_of(*ordinal) {
            *counts.entry(keyword.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(THEME_KEYWORDS)
        .map(|(keyword, _)| keyword)
        .collect::<Vec<_>>()
        .join(", ")
}
