//! Domain events for the knowledge store
//!
//! Events are returned from the operations that produce them and can also be
//! forwarded to an orchestrator over a channel. There is no global bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::conflict::ConflictPolicy;
use super::entry::{KnowledgeCategory, ValidationStatus};

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum KnowledgeEvent {
    /// An entry passed validation and was stored
    EntryIngested {
        entry_id: Uuid,
        category: KnowledgeCategory,
        confidence: u8,
        timestamp: DateTime<Utc>,
    },
    /// An entry fell below the confidence threshold; stored for audit only
    EntryRejected {
        entry_id: Uuid,
        confidence: u8,
        threshold: u8,
        timestamp: DateTime<Utc>,
    },
    /// A conflicting pair was settled
    ConflictResolved {
        incoming_id: Uuid,
        existing_id: Uuid,
        policy: ConflictPolicy,
        winner_id: Option<Uuid>,
        changes: Vec<(Uuid, ValidationStatus)>,
        timestamp: DateTime<Utc>,
    },
    /// Eviction trimmed the store back under capacity
    EntriesEvicted {
        evicted: usize,
        retained: usize,
        timestamp: DateTime<Utc>,
    },
    /// A new keyword/phrase index generation was published
    IndexRebuilt {
        generation: u64,
        entries: usize,
        keywords: usize,
        phrases: usize,
        timestamp: DateTime<Utc>,
    },
    /// A new relationship graph and cluster set was published
    GraphRebuilt {
        generation: u64,
        edges: usize,
        clusters: usize,
        timestamp: DateTime<Utc>,
    },
    /// A legacy file was migrated
    MigrationCompleted {
        source: PathBuf,
        migrated: usize,
        skipped_duplicates: usize,
        malformed: usize,
        timestamp: DateTime<Utc>,
    },
    /// A backup copy was written
    BackupCreated {
        path: PathBuf,
        retained: usize,
        timestamp: DateTime<Utc>,
    },
    /// The log was folded into the compacted file
    StoreCompacted {
        entries: usize,
        timestamp: DateTime<Utc>,
    },
}

impl KnowledgeEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EntryIngested { timestamp, .. }
            | Self::EntryRejected { timestamp, .. }
            | Self::ConflictResolved { timestamp, .. }
            | Self::EntriesEvicted { timestamp, .. }
            | Self::IndexRebuilt { timestamp, .. }
            | Self::GraphRebuilt { timestamp, .. }
            | Self::MigrationCompleted { timestamp, .. }
            | Self::BackupCreated { timestamp, .. }
            | Self::StoreCompacted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::EntryIngested { .. } => "entry_ingested",
            Self::EntryRejected { .. } => "entry_rejected",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::EntriesEvicted { .. } => "entries_evicted",
            Self::IndexRebuilt { .. } => "index_rebuilt",
            Self::GraphRebuilt { .. } => "graph_rebuilt",
            Self::MigrationCompleted { .. } => "migration_completed",
            Self::BackupCreated { .. } => "backup_created",
            Self::StoreCompacted { .. } => "store_compacted",
        }
    }

    /// The entry an event is about, if it concerns a single entry
    pub fn entry_id(&self) -> Option<Uuid> {
        match self {
            Self::EntryIngested { entry_id, .. } | Self::EntryRejected { entry_id, .. } => {
                Some(*entry_id)
            }
            Self::ConflictResolved { incoming_id, .. } => Some(*incoming_id),
            _ => None,
        }
    }

    pub fn entry_ingested(entry_id: Uuid, category: KnowledgeCategory, confidence: u8) -> Self {
        Self::EntryIngested {
            entry_id,
            category,
            confidence,
            timestamp: Utc::now(),
        }
    }

    pub fn entry_rejected(entry_id: Uuid, confidence: u8, threshold: u8) -> Self {
        Self::EntryRejected {
            entry_id,
            confidence,
            threshold,
            timestamp: Utc::now(),
        }
    }

    pub fn conflict_resolved(resolution: &super::conflict::ConflictResolution) -> Self {
        Self::ConflictResolved {
            incoming_id: resolution.incoming,
            existing_id: resolution.existing,
            policy: resolution.policy,
            winner_id: resolution.winner,
            changes: resolution.changes.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn entries_evicted(evicted: usize, retained: usize) -> Self {
        Self::EntriesEvicted {
            evicted,
            retained,
            timestamp: Utc::now(),
        }
    }
}
