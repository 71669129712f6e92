//! Knowledge store
//!
//! Owns the authoritative set of entries and every mutation of it. The store
//! is synchronous and single-owner; the engine wraps it in the mutation gate.
//! Every change is written to the `RecordStore` before it is applied in
//! memory, so a failed write leaves the in-memory state untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::confidence::ConfidenceRubric;
use super::conflict::{ConflictPolicy, ConflictResolution, conflict_similarity, resolve};
use super::entry::{EntryContext, KnowledgeCategory, KnowledgeEntry, KnowledgeSource, ValidationStatus};
use super::event::KnowledgeEvent;
use crate::config::Config;
use crate::domain::index::{extract_keywords, keyword_set};
use crate::error::{Error, Result};
use crate::storage::{LegacyRecord, RecordStore};

/// Fraction of `max_entries` kept by eviction
const EVICTION_RETAIN_RATIO: f64 = 0.9;

/// Store tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSettings {
    pub max_entries: usize,
    pub confidence_threshold: u8,
    pub conflict_policy: ConflictPolicy,
    pub conflict_similarity: f64,
    pub max_keywords: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for StoreSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_entries: config.store.max_entries,
            confidence_threshold: config.store.confidence_threshold,
            conflict_policy: config.store.conflict_policy,
            conflict_similarity: config.store.conflict_similarity,
            max_keywords: config.index.max_keywords,
        }
    }
}

/// What happened to one ingested entry
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub id: Uuid,
    pub confidence: u8,
    /// Final status after threshold check and conflict resolution
    pub status: ValidationStatus,
    pub conflicts: Vec<ConflictResolution>,
    pub events: Vec<KnowledgeEvent>,
}

impl IngestReceipt {
    pub fn is_rejected(&self) -> bool {
        self.status == ValidationStatus::Rejected
    }
}

/// Best existing match for a candidate entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConflictMatch {
    pub existing_id: Uuid,
    pub similarity: f64,
}

/// Result of one eviction pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionReport {
    pub evicted: Vec<Uuid>,
    pub retained: usize,
    pub events: Vec<KnowledgeEvent>,
}

/// Aggregated outcome of migrating legacy records
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped_duplicates: usize,
    pub malformed: usize,
    /// Migrated but below the confidence threshold
    pub rejected: usize,
    pub conflicts: usize,
    /// Relationship ids resolved to migrated entries
    pub linked: usize,
    /// Relationship ids naming no known record
    pub unresolved_links: usize,
    pub warnings: Vec<String>,
    pub events: Vec<KnowledgeEvent>,
    /// Legacy relationship ids awaiting `KnowledgeStore::link_migrated`
    #[serde(skip)]
    pub pending_links: Vec<PendingLinks>,
}

/// Legacy ids one migrated entry links to
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLinks {
    pub entry: Uuid,
    pub line: usize,
    pub origins: Vec<String>,
}

impl MigrationReport {
    pub fn absorb(&mut self, other: MigrationReport) {
        self.migrated += other.migrated;
        self.skipped_duplicates += other.skipped_duplicates;
        self.malformed += other.malformed;
        self.rejected += other.rejected;
        self.conflicts += other.conflicts;
        self.linked += other.linked;
        self.unresolved_links += other.unresolved_links;
        self.warnings.extend(other.warnings);
        self.events.extend(other.events);
        self.pending_links.extend(other.pending_links);
    }

    /// Records that produced no entry
    pub fn skipped(&self) -> usize {
        self.skipped_duplicates + self.malformed
    }
}

/// Counts by status and category
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub live: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub corrupt_on_load: usize,
    pub pending_telemetry: usize,
    pub version: u64,
}

/// In-memory working set backed by a `RecordStore`
pub struct KnowledgeStore {
    backend: Box<dyn RecordStore>,
    settings: StoreSettings,
    rubric: ConfidenceRubric,
    entries: BTreeMap<Uuid, KnowledgeEntry>,
    /// Keyword sets of live entries, for conflict detection
    keywords: HashMap<Uuid, HashSet<String>>,
    /// keyword -> live entries containing it
    postings: HashMap<String, HashSet<Uuid>>,
    origins: HashMap<String, Uuid>,
    /// Entries whose telemetry has not been persisted yet
    dirty: HashSet<Uuid>,
    version: u64,
    corrupt_on_load: usize,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("entries", &self.entries.len())
            .field("version", &self.version)
            .field("settings", &self.settings)
            .finish()
    }
}

impl KnowledgeStore {
    /// Load the backend's current state
    pub fn open(mut backend: Box<dyn RecordStore>, settings: StoreSettings) -> Result<Self> {
        let load = backend.load()?;
        let mut store = Self {
            backend,
            settings,
            rubric: ConfidenceRubric::new(settings.confidence_threshold),
            entries: BTreeMap::new(),
            keywords: HashMap::new(),
            postings: HashMap::new(),
            origins: HashMap::new(),
            dirty: HashSet::new(),
            version: 0,
            corrupt_on_load: load.corrupt,
        };
        for entry in load.entries {
            store.apply_insert(entry);
        }
        store.version = 1;
        Ok(store)
    }

    // ========== Accessors ==========

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn rubric(&self) -> &ConfidenceRubric {
        &self.rubric
    }

    /// Bumped on every change that affects indexing
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&KnowledgeEntry> {
        self.entries.get(id)
    }

    pub fn contains_origin(&self, origin_id: &str) -> bool {
        self.origins.contains_key(origin_id)
    }

    /// All entries in id order, rejected ones included
    pub fn entries(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.entries.values()
    }

    /// Entries eligible for indexing and querying, in id order
    pub fn live_entries(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.entries.values().filter(|e| e.is_live())
    }

    pub fn layout(&self) -> Option<&crate::storage::DataLayout> {
        self.backend.layout()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total: self.entries.len(),
            corrupt_on_load: self.corrupt_on_load,
            pending_telemetry: self.dirty.len(),
            version: self.version,
            ..StoreStats::default()
        };
        for status in ValidationStatus::all() {
            stats.by_status.insert(status.as_str().to_string(), 0);
        }
        for entry in self.entries.values() {
            if entry.is_live() {
                stats.live += 1;
            }
            *stats
                .by_status
                .entry(entry.validation_status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_category
                .entry(entry.category.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    // ========== Ingest ==========

    /// Score, validate, resolve conflicts and persist new knowledge
    pub fn ingest(
        &mut self,
        content: impl Into<String>,
        source: KnowledgeSource,
        category: KnowledgeCategory,
        context: EntryContext,
    ) -> Result<IngestReceipt> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("content must not be empty".to_string()));
        }
        let entry = KnowledgeEntry::new(content, source, category, context);
        let confidence = self.rubric.score(&entry.content, entry.source, &entry.context);
        let receipt = self.insert(entry.with_confidence(confidence))?;
        self.backend.sync()?;
        Ok(receipt)
    }

    /// Store a fully formed entry, keeping its confidence and telemetry.
    /// The threshold and conflict rules still apply.
    pub fn insert(&mut self, mut entry: KnowledgeEntry) -> Result<IngestReceipt> {
        if self.entries.contains_key(&entry.id) {
            return Err(Error::InvalidInput(format!("entry {} already exists", entry.id)));
        }
        entry.confidence_score = entry.confidence_score.min(100);
        entry.context = entry.context.normalized();

        let mut events = Vec::new();
        if !self.rubric.accepts(entry.confidence_score) {
            entry.validation_status = ValidationStatus::Rejected;
            events.push(KnowledgeEvent::entry_rejected(
                entry.id,
                entry.confidence_score,
                self.rubric.threshold,
            ));
            debug!(entry_id = %entry.id, confidence = entry.confidence_score, "Entry below confidence threshold");
        }

        let mut conflicts = Vec::new();
        let mut touched: BTreeMap<Uuid, KnowledgeEntry> = BTreeMap::new();

        if entry.is_live() {
            let entry_keywords = keyword_set(&extract_keywords(&entry.content, self.settings.max_keywords));
            for found in self.conflict_candidates(&entry, &entry_keywords) {
                let Some(existing) = self.entries.get(&found.existing_id) else {
                    continue;
                };
                let resolution = resolve(self.settings.conflict_policy, &entry, existing, found.similarity);

                let mut existing = existing.clone();
                for (id, status) in &resolution.changes {
                    if *id == entry.id {
                        entry.transition(*status)?;
                    } else {
                        existing.transition(*status)?;
                    }
                }
                if existing.validation_status != self.entries[&existing.id].validation_status {
                    touched.insert(existing.id, existing);
                }

                info!(
                    incoming = %resolution.incoming,
                    existing = %resolution.existing,
                    policy = %resolution.policy,
                    similarity = resolution.similarity,
                    "Resolved knowledge conflict"
                );
                events.push(KnowledgeEvent::conflict_resolved(&resolution));
                conflicts.push(resolution);

                if !entry.is_live() {
                    break;
                }
            }
        }

        if entry.is_live() {
            events.insert(
                0,
                KnowledgeEvent::entry_ingested(entry.id, entry.category, entry.confidence_score),
            );
        }

        self.backend.append(&entry)?;
        for changed in touched.values() {
            self.backend.append(changed)?;
        }

        let receipt = IngestReceipt {
            id: entry.id,
            confidence: entry.confidence_score,
            status: entry.validation_status,
            conflicts,
            events,
        };

        for changed in touched.into_values() {
            self.apply_replace(changed);
        }
        self.apply_insert(entry);
        self.version += 1;

        Ok(receipt)
    }

    /// Live entries that conflict with `entry`, most similar first
    fn conflict_candidates(&self, entry: &KnowledgeEntry, entry_keywords: &HashSet<String>) -> Vec<ConflictMatch> {
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for keyword in entry_keywords {
            let Some(ids) = self.postings.get(keyword) else {
                continue;
            };
            for id in ids {
                if !seen.insert(*id) {
                    continue;
                }
                let (Some(existing), Some(existing_keywords)) = (self.entries.get(id), self.keywords.get(id)) else {
                    continue;
                };
                if let Some(similarity) = conflict_similarity(
                    entry,
                    entry_keywords,
                    existing,
                    existing_keywords,
                    self.settings.conflict_similarity,
                ) {
                    matches.push(ConflictMatch {
                        existing_id: *id,
                        similarity,
                    });
                }
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.existing_id.cmp(&b.existing_id))
        });
        matches
    }

    /// Strongest conflict `entry` would have with the stored entries
    pub fn detect_conflict(&self, entry: &KnowledgeEntry) -> Option<ConflictMatch> {
        let keywords = keyword_set(&extract_keywords(&entry.content, self.settings.max_keywords));
        self.conflict_candidates(entry, &keywords).into_iter().next()
    }

    // ========== Status ==========

    /// Move an entry to `status`, enforcing the transition table
    pub fn set_status(&mut self, id: Uuid, status: ValidationStatus) -> Result<()> {
        let mut entry = self
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))?;
        if entry.validation_status == status {
            return Ok(());
        }
        entry.transition(status)?;
        self.backend.append(&entry)?;
        self.dirty.remove(&id);
        self.apply_replace(entry);
        self.version += 1;
        info!(entry_id = %id, status = %status, "Updated entry status");
        Ok(())
    }

    // ========== Telemetry ==========

    /// Apply retrieval telemetry to `ids`; persisted by `flush` or `compact`
    pub fn record_access(&mut self, ids: &[Uuid], at: DateTime<Utc>) -> Vec<KnowledgeEntry> {
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.record_access(at);
                self.dirty.insert(*id);
                updated.push(entry.clone());
            }
        }
        updated
    }

    /// Append pending telemetry to the log
    pub fn flush(&mut self) -> Result<usize> {
        let mut flushed = 0;
        let mut ids: Vec<Uuid> = self.dirty.iter().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(entry) = self.entries.get(&id) {
                self.backend.append(entry)?;
                flushed += 1;
            }
            self.dirty.remove(&id);
        }
        self.backend.sync()?;
        if flushed > 0 {
            debug!(flushed, "Flushed access telemetry");
        }
        Ok(flushed)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.backend.sync()
    }

    /// Rewrite the compacted file from the current state and truncate the log
    pub fn compact(&mut self) -> Result<usize> {
        let entries: Vec<&KnowledgeEntry> = self.entries.values().collect();
        self.backend.rewrite(&entries)?;
        let count = entries.len();
        self.dirty.clear();
        info!(entries = count, "Compacted knowledge store");
        Ok(count)
    }

    // ========== Eviction ==========

    /// When over capacity, keep the best `floor(0.9 * max)` entries ranked by
    /// `utility_score + age_in_days` and drop the rest
    pub fn evict_if_over_capacity(&mut self, now: DateTime<Utc>) -> Result<EvictionReport> {
        let max = self.settings.max_entries;
        if self.entries.len() <= max {
            return Ok(EvictionReport {
                retained: self.entries.len(),
                ..EvictionReport::default()
            });
        }

        let keep = ((max as f64) * EVICTION_RETAIN_RATIO).floor() as usize;
        let mut ranked: Vec<(f64, &KnowledgeEntry)> = self
            .entries
            .values()
            .map(|e| (eviction_score(e, now), e))
            .collect();
        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then(b.timestamp.cmp(&a.timestamp))
                .then(a.id.cmp(&b.id))
        });

        let evicted: Vec<Uuid> = ranked[keep..].iter().map(|(_, e)| e.id).collect();
        let retained: Vec<&KnowledgeEntry> = ranked[..keep].iter().map(|(_, e)| *e).collect();
        self.backend.rewrite(&retained)?;

        for id in &evicted {
            self.apply_remove(id);
        }
        self.dirty.clear();
        self.version += 1;

        let retained = self.entries.len();
        warn!(evicted = evicted.len(), retained, max_entries = max, "Evicted entries over capacity");

        Ok(EvictionReport {
            events: vec![KnowledgeEvent::entries_evicted(evicted.len(), retained)],
            evicted,
            retained,
        })
    }

    // ========== Migration ==========

    /// Migrate parsed legacy records. Parse failures are counted, records
    /// whose origin id is already stored are skipped, I/O failures abort.
    pub fn migrate<I>(&mut self, records: I) -> Result<MigrationReport>
    where
        I: IntoIterator<Item = Result<LegacyRecord>>,
    {
        let mut report = MigrationReport::default();

        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(Error::LegacyParse { line, reason }) => {
                    warn!(line, reason = %reason, "Skipping malformed legacy record");
                    report.malformed += 1;
                    report.warnings.push(format!("line {}: {}", line, reason));
                    continue;
                }
                Err(e) => return Err(e),
            };

            if self.contains_origin(&record.origin_id) {
                report.skipped_duplicates += 1;
                continue;
            }

            let mut entry = record.to_entry();
            if record.confidence.is_none() {
                entry.confidence_score = self.rubric.score(&entry.content, entry.source, &entry.context);
            }

            let receipt = self.insert(entry)?;
            if !record.relationships.is_empty() {
                report.pending_links.push(PendingLinks {
                    entry: receipt.id,
                    line: record.line,
                    origins: record.relationships,
                });
            }
            report.migrated += 1;
            report.conflicts += receipt.conflicts.len();
            if receipt.is_rejected() && receipt.conflicts.is_empty() {
                report.rejected += 1;
            }
            report.events.extend(receipt.events);
        }

        self.backend.sync()?;
        Ok(report)
    }

    /// Resolve the report's pending legacy relationship ids through the
    /// origin map and persist the linked entries. Run once every batch of a
    /// file has been migrated so links to later records resolve too.
    pub fn link_migrated(&mut self, report: &mut MigrationReport) -> Result<()> {
        let mut changed = 0;
        for pending in std::mem::take(&mut report.pending_links) {
            let Some(mut entry) = self.entries.get(&pending.entry).cloned() else {
                continue;
            };
            let before = entry.relationships.len();
            for origin in &pending.origins {
                match self.origins.get(origin) {
                    Some(&target) if target == pending.entry => {}
                    Some(&target) => {
                        entry = entry.with_relationship(target);
                        report.linked += 1;
                    }
                    None => {
                        warn!(line = pending.line, origin = %origin, "Legacy relationship names no record");
                        report.unresolved_links += 1;
                        report
                            .warnings
                            .push(format!("line {}: unknown relationship '{}'", pending.line, origin));
                    }
                }
            }
            if entry.relationships.len() == before {
                continue;
            }
            self.backend.append(&entry)?;
            self.dirty.remove(&entry.id);
            self.apply_replace(entry);
            self.version += 1;
            changed += 1;
        }

        if changed > 0 {
            self.backend.sync()?;
            debug!(entries = changed, links = report.linked, "Linked migrated entries");
        }
        Ok(())
    }

    // ========== In-memory bookkeeping ==========

    fn apply_insert(&mut self, entry: KnowledgeEntry) {
        if let Some(origin) = &entry.origin_id {
            self.origins.insert(origin.clone(), entry.id);
        }
        if entry.is_live() {
            self.index_keywords(&entry);
        }
        self.entries.insert(entry.id, entry);
    }

    fn apply_replace(&mut self, entry: KnowledgeEntry) {
        if !entry.is_live() {
            self.unindex_keywords(&entry.id);
        }
        self.entries.insert(entry.id, entry);
    }

    fn apply_remove(&mut self, id: &Uuid) {
        self.unindex_keywords(id);
        self.dirty.remove(id);
        if let Some(entry) = self.entries.remove(id) {
            if let Some(origin) = entry.origin_id {
                self.origins.remove(&origin);
            }
        }
    }

    fn index_keywords(&mut self, entry: &KnowledgeEntry) {
        let keywords = keyword_set(&extract_keywords(&entry.content, self.settings.max_keywords));
        for keyword in &keywords {
            self.postings.entry(keyword.clone()).or_default().insert(entry.id);
        }
        self.keywords.insert(entry.id, keywords);
    }

    fn unindex_keywords(&mut self, id: &Uuid) {
        let Some(keywords) = self.keywords.remove(id) else {
            return;
        };
        for keyword in keywords {
            if let Some(ids) = self.postings.get_mut(&keyword) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(&keyword);
                }
            }
        }
    }
}

/// Eviction rank: higher is kept
pub fn eviction_score(entry: &KnowledgeEntry, now: DateTime<Utc>) -> f64 {
    f64::from(entry.utility_score) + entry.age_days(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStore;
    use chrono::Duration;

    fn store_with(settings: StoreSettings) -> KnowledgeStore {
        KnowledgeStore::open(Box::new(MemoryRecordStore::new()), settings).unwrap()
    }

    fn store() -> KnowledgeStore {
        store_with(StoreSettings::default())
    }

    fn system_entry(content: &str, confidence: u8) -> KnowledgeEntry {
        KnowledgeEntry::new(
            content,
            KnowledgeSource::System,
            KnowledgeCategory::Technical,
            EntryContext::new(),
        )
        .with_confidence(confidence)
    }

    #[test]
    fn test_ingest_scores_and_stores() {
        let mut store = store();
        let receipt = store
            .ingest(
                "Dimming the display extends battery life",
                KnowledgeSource::System,
                KnowledgeCategory::Technical,
                EntryContext::new(),
            )
            .unwrap();

        assert_eq!(receipt.confidence, 80);
        assert_eq!(receipt.status, ValidationStatus::Pending);
        assert_eq!(receipt.events[0].event_type_name(), "entry_ingested");
        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_low_confidence_rejected_but_kept() {
        let mut store = store();
        let receipt = store
            .ingest(
                "maybe the fan was loud",
                KnowledgeSource::Interaction,
                KnowledgeCategory::Behavioral,
                EntryContext::new().with_trust_level(0),
            )
            .unwrap();

        assert!(receipt.is_rejected());
        assert_eq!(receipt.events[0].event_type_name(), "entry_rejected");
        assert_eq!(store.len(), 1);
        assert_eq!(store.live_entries().count(), 0);
    }

    #[test]
    fn test_empty_content_is_invalid() {
        let mut store = store();
        let err = store
            .ingest("   ", KnowledgeSource::System, KnowledgeCategory::Technical, EntryContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_highest_confidence_rejects_lower() {
        let mut store = store();
        let low = store.insert(system_entry("battery optimization reduces drain", 60)).unwrap();
        let high = store.insert(system_entry("battery optimization reduces drain", 90)).unwrap();

        assert_eq!(high.conflicts.len(), 1);
        assert_eq!(store.get(&low.id).unwrap().validation_status, ValidationStatus::Rejected);
        assert_eq!(store.get(&high.id).unwrap().validation_status, ValidationStatus::Pending);
    }

    #[test]
    fn test_incoming_loser_rejected() {
        let mut store = store();
        let high = store.insert(system_entry("battery optimization reduces drain", 90)).unwrap();
        let low = store.insert(system_entry("battery optimization reduces drain", 60)).unwrap();

        assert!(low.is_rejected());
        assert_eq!(store.get(&high.id).unwrap().validation_status, ValidationStatus::Pending);
    }

    #[test]
    fn test_manual_policy_marks_conflicted() {
        let mut store = store_with(StoreSettings {
            conflict_policy: ConflictPolicy::Manual,
            ..StoreSettings::default()
        });
        let a = store.insert(system_entry("battery optimization reduces drain", 60)).unwrap();
        let b = store.insert(system_entry("battery optimization reduces drain", 90)).unwrap();

        assert_eq!(b.status, ValidationStatus::Conflicted);
        assert_eq!(store.get(&a.id).unwrap().validation_status, ValidationStatus::Conflicted);

        store.set_status(a.id, ValidationStatus::Rejected).unwrap();
        store.set_status(b.id, ValidationStatus::Validated).unwrap();
        assert_eq!(store.live_entries().count(), 1);
    }

    #[test]
    fn test_detect_conflict_does_not_mutate() {
        let mut store = store();
        let existing = store.insert(system_entry("battery optimization reduces drain", 60)).unwrap();
        let candidate = system_entry("battery optimization reduces drain", 75);

        let found = store.detect_conflict(&candidate).unwrap();
        assert_eq!(found.existing_id, existing.id);
        assert_eq!(found.similarity, 1.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_status_rejects_invalid_transition() {
        let mut store = store();
        let receipt = store.insert(system_entry("validated knowledge", 90)).unwrap();
        store.set_status(receipt.id, ValidationStatus::Validated).unwrap();

        let err = store.set_status(receipt.id, ValidationStatus::Pending).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(matches!(
            store.set_status(Uuid::new_v4(), ValidationStatus::Validated),
            Err(Error::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_eviction_keeps_top_ninety_percent() {
        let mut store = store_with(StoreSettings {
            max_entries: 20,
            ..StoreSettings::default()
        });
        let now = Utc::now();
        for i in 0..25u8 {
            let mut entry = system_entry(&format!("reading{i} channel{i}"), 80).with_timestamp(now);
            entry.utility_score = i;
            store.insert(entry).unwrap();
        }

        let report = store.evict_if_over_capacity(now).unwrap();
        assert_eq!(report.evicted.len(), 7);
        assert_eq!(store.len(), 18);
        assert!(store.entries().all(|e| e.utility_score >= 7));
    }

    #[test]
    fn test_eviction_noop_under_capacity() {
        let mut store = store();
        store.insert(system_entry("lonely entry", 80)).unwrap();
        let report = store.evict_if_over_capacity(Utc::now()).unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(report.retained, 1);
    }

    #[test]
    fn test_older_entries_rank_higher() {
        let now = Utc::now();
        let old = system_entry("old", 80).with_timestamp(now - Duration::days(10));
        let new = system_entry("new", 80).with_timestamp(now);
        assert!(eviction_score(&old, now) > eviction_score(&new, now));
    }

    #[test]
    fn test_record_access_and_flush() {
        let mut store = store();
        let receipt = store.insert(system_entry("frequently read", 80)).unwrap();

        let updated = store.record_access(&[receipt.id], Utc::now());
        assert_eq!(updated[0].access_count, 1);
        assert_eq!(store.stats().pending_telemetry, 1);

        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(store.stats().pending_telemetry, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let lines = [
            r#"{"id": "a", "content": "legacy battery note", "source": "system"}"#,
            r#"{"id": "b", "content": "legacy network note", "source": "system"}"#,
            "not json",
        ];
        let parse = || {
            lines
                .iter()
                .enumerate()
                .filter_map(|(i, l)| crate::storage::legacy::parse_line(i + 1, l))
                .collect::<Vec<_>>()
        };

        let mut store = store();
        let first = store.migrate(parse()).unwrap();
        assert_eq!(first.migrated, 2);
        assert_eq!(first.malformed, 1);

        let second = store.migrate(parse()).unwrap();
        assert_eq!(second.migrated, 0);
        assert_eq!(second.skipped_duplicates, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_migrated_relationships_resolve_across_batches() {
        let lines = [
            r#"{"id": "a", "content": "legacy battery note", "source": "system", "relationships": ["b", "gone", "a"]}"#,
            r#"{"id": "b", "content": "legacy network note", "source": "system"}"#,
        ];
        let batch = |i: usize| crate::storage::legacy::parse_line(i + 1, lines[i]).into_iter().collect::<Vec<_>>();

        let mut store = store();
        let mut report = store.migrate(batch(0)).unwrap();
        assert_eq!(report.pending_links.len(), 1);
        report.absorb(store.migrate(batch(1)).unwrap());
        store.link_migrated(&mut report).unwrap();

        let a = store.origins["a"];
        let b = store.origins["b"];
        assert_eq!(store.get(&a).unwrap().relationships, std::iter::once(b).collect::<std::collections::BTreeSet<_>>());
        assert!(store.get(&b).unwrap().relationships.is_empty());
        assert_eq!(report.linked, 1);
        assert_eq!(report.unresolved_links, 1);
        assert!(report.pending_links.is_empty());
        assert!(report.warnings.iter().any(|w| w.contains("'gone'")));
    }

    #[test]
    fn test_stats_counts() {
        let mut store = store();
        store.insert(system_entry("kept entry", 80)).unwrap();
        store.insert(system_entry("weak entry", 10)).unwrap();

        let stats = store.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.by_status["rejected"], 1);
        assert_eq!(stats.by_status["validated"], 0);
        assert_eq!(stats.by_category["technical"], 2);
    }
}
