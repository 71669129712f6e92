//! Knowledge Memory Engine core library
//!
//! This crate provides the core functionality for KME, including:
//! - Storage (binary record codec, append log, compacted file, snapshots)
//! - Knowledge store (confidence scoring, conflict resolution, eviction)
//! - Keyword/phrase indexing and ranked queries
//! - Relationship graph and semantic clusters
//! - Engine orchestration and background lifecycle

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod storage;

#[cfg(test)]
mod config_tests;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::knowledge::{
        ConflictPolicy, EntryContext, KnowledgeCategory, KnowledgeEntry, KnowledgeEvent, KnowledgeSource,
        ValidationStatus,
    };
    pub use crate::domain::query::{KnowledgeQuery, QueryHit};
    pub use crate::engine::{KnowledgeEngine, LifecycleManager, QueryResponse};
    pub use crate::error::{Error, Result};
}
