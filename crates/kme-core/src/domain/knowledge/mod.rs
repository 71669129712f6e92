//! Knowledge domain module
//!
//! Entries, the rules that decide whether they are trusted, and the store
//! that owns them.
//!
//! ## Data Model
//!
//! - **KnowledgeEntry**: immutable content plus status and retrieval telemetry
//! - **EntryContext**: trust level, emotional label, optional sensor payload
//! - **ConfidenceRubric**: scores new entries; below threshold means rejected
//! - **ConflictPolicy**: how near-duplicate entries with different
//!   confidence are settled
//! - **KnowledgeStore**: ingest, status changes, eviction, migration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kme_core::domain::knowledge::*;
//! use kme_core::storage::MemoryRecordStore;
//!
//! let mut store = KnowledgeStore::open(Box::new(MemoryRecordStore::new()), StoreSettings::default())?;
//! let receipt = store.ingest(
//!     "Dimming the display extends battery life",
//!     KnowledgeSource::System,
//!     KnowledgeCategory::Technical,
//!     EntryContext::new().with_trust_level(80),
//! )?;
//! assert!(!receipt.is_rejected());
//! ```

mod confidence;
mod conflict;
mod entry;
mod event;
mod store;

pub use confidence::{ConfidenceBreakdown, ConfidenceRubric};
pub use conflict::{ConflictPolicy, ConflictResolution, conflict_similarity, resolve};
pub use entry::{EntryContext, KnowledgeCategory, KnowledgeEntry, KnowledgeSource, ValidationStatus};
pub use event::KnowledgeEvent;
pub use store::{
    ConflictMatch, EvictionReport, IngestReceipt, KnowledgeStore, MigrationReport, PendingLinks,
    StoreSettings, StoreStats, eviction_score,
};
