//! Immutable index generations
//!
//! Readers clone the current `Arc<IndexGeneration>` and work against it for
//! the whole query. Rebuilds assemble a fresh generation off to the side and
//! swap the pointer, so a reader never observes a half-built index.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::graph::{RelationshipGraph, SemanticCluster};
use crate::domain::index::LexicalIndex;

#[derive(Debug, Clone)]
pub struct IndexGeneration {
    /// Monotonic counter, bumped on every publish
    pub generation: u64,
    pub lexical: Arc<LexicalIndex>,
    pub graph: Arc<RelationshipGraph>,
    pub clusters: Arc<Vec<SemanticCluster>>,
    pub published_at: DateTime<Utc>,
}

impl IndexGeneration {
    pub fn new(generation: u64, lexical: LexicalIndex) -> Self {
        Self {
            generation,
            lexical: Arc::new(lexical),
            graph: Arc::new(RelationshipGraph::default()),
            clusters: Arc::new(Vec::new()),
            published_at: Utc::now(),
        }
    }

    /// Same graph, new lexical index
    pub fn with_lexical(&self, generation: u64, lexical: LexicalIndex) -> Self {
        Self {
            generation,
            lexical: Arc::new(lexical),
            graph: Arc::clone(&self.graph),
            clusters: Arc::clone(&self.clusters),
            published_at: Utc::now(),
        }
    }

    /// Same lexical index, new graph and clusters
    pub fn with_graph(&self, generation: u64, graph: RelationshipGraph, clusters: Vec<SemanticCluster>) -> Self {
        Self {
            generation,
            lexical: Arc::clone(&self.lexical),
            graph: Arc::new(graph),
            clusters: Arc::new(clusters),
            published_at: Utc::now(),
        }
    }

    /// Store version the lexical index reflects
    pub fn lexical_version(&self) -> u64 {
        self.lexical.store_version
    }

    /// Store version the graph reflects; 0 if never built
    pub fn graph_version(&self) -> u64 {
        self.graph.store_version
    }

    pub fn is_stale(&self, store_version: u64) -> bool {
        self.lexical_version() < store_version
    }
}
