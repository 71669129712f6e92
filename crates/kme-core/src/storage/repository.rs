//! Record store trait and backends
//!
//! The knowledge store keeps its working set in memory and pushes every
//! mutation through a `RecordStore`. Backends:
//!
//! - `DiskRecordStore`: append log plus compacted file in a data directory
//! - `MemoryRecordStore`: nothing leaves the process; used by tests and
//!   throwaway engines

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use super::{DataLayout, compacted, log::{AppendLog, LogRecord}};
use crate::domain::knowledge::KnowledgeEntry;
use crate::error::Result;

/// What a backend hands back when the store opens
#[derive(Debug, Default)]
pub struct StoreLoad {
    pub entries: Vec<KnowledgeEntry>,
    /// Records skipped because they failed checksum or decode
    pub corrupt: usize,
    pub truncated_tail: bool,
}

/// Persistence seam for the knowledge store
pub trait RecordStore: Send {
    // ========== Recovery ==========

    /// Rebuild the current state, last write wins per id
    fn load(&mut self) -> Result<StoreLoad>;

    // ========== Mutation ==========

    /// Persist a new or changed entry
    fn append(&mut self, entry: &KnowledgeEntry) -> Result<()>;

    /// Persist the removal of an entry
    fn append_tombstone(&mut self, id: Uuid) -> Result<()>;

    /// Replace all persisted state with `entries`
    fn rewrite(&mut self, entries: &[&KnowledgeEntry]) -> Result<()>;

    /// Flush buffered writes to durable storage
    fn sync(&mut self) -> Result<()>;

    // ========== Introspection ==========

    /// Directory layout, for backends that live on disk
    fn layout(&self) -> Option<&DataLayout> {
        None
    }
}

/// Append log plus compacted file under one data directory
#[derive(Debug)]
pub struct DiskRecordStore {
    layout: DataLayout,
    log: AppendLog,
}

impl DiskRecordStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let layout = DataLayout::new(dir.as_ref());
        fs::create_dir_all(layout.dir())?;
        let log = AppendLog::open(layout.log_path())?;
        Ok(Self { layout, log })
    }
}

impl RecordStore for DiskRecordStore {
    fn load(&mut self) -> Result<StoreLoad> {
        let compacted = compacted::read(&self.layout.compacted_path())?;
        let replay = self.log.replay()?;

        let mut entries: BTreeMap<Uuid, KnowledgeEntry> = compacted
            .entries
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();

        for record in replay.records {
            match record {
                LogRecord::Upsert(entry) => {
                    entries.insert(entry.id, entry);
                }
                LogRecord::Tombstone(id) => {
                    entries.remove(&id);
                }
            }
        }

        let corrupt = compacted.corrupt + replay.corrupt;
        if corrupt > 0 || replay.truncated_tail {
            warn!(
                corrupt,
                truncated_tail = replay.truncated_tail,
                dir = %self.layout.dir().display(),
                "Skipped unreadable records while loading store"
            );
        }
        info!(entries = entries.len(), dir = %self.layout.dir().display(), "Loaded knowledge store");

        Ok(StoreLoad {
            entries: entries.into_values().collect(),
            corrupt,
            truncated_tail: replay.truncated_tail,
        })
    }

    fn append(&mut self, entry: &KnowledgeEntry) -> Result<()> {
        self.log.append_upsert(entry)
    }

    fn append_tombstone(&mut self, id: Uuid) -> Result<()> {
        self.log.append_tombstone(id)
    }

    fn rewrite(&mut self, entries: &[&KnowledgeEntry]) -> Result<()> {
        compacted::write(&self.layout.compacted_path(), entries.iter().copied())?;
        self.log.truncate()
    }

    fn sync(&mut self) -> Result<()> {
        self.log.sync()
    }

    fn layout(&self) -> Option<&DataLayout> {
        Some(&self.layout)
    }
}

/// Keeps the persisted image in memory
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    entries: BTreeMap<Uuid, KnowledgeEntry>,
    appended: usize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a pre-existing image
    pub fn with_entries(entries: impl IntoIterator<Item = KnowledgeEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id, e)).collect(),
            appended: 0,
        }
    }

    /// Frames appended since the last rewrite
    pub fn appended(&self) -> usize {
        self.appended
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&mut self) -> Result<StoreLoad> {
        Ok(StoreLoad {
            entries: self.entries.values().cloned().collect(),
            ..StoreLoad::default()
        })
    }

    fn append(&mut self, entry: &KnowledgeEntry) -> Result<()> {
        self.entries.insert(entry.id, entry.clone());
        self.appended += 1;
        Ok(())
    }

    fn append_tombstone(&mut self, id: Uuid) -> Result<()> {
        self.entries.remove(&id);
        self.appended += 1;
        Ok(())
    }

    fn rewrite(&mut self, entries: &[&KnowledgeEntry]) -> Result<()> {
        self.entries = entries.iter().map(|e| (e.id, (*e).clone())).collect();
        self.appended = 0;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{EntryContext, KnowledgeCategory, KnowledgeSource};

    fn entry(content: &str) -> KnowledgeEntry {
        KnowledgeEntry::new(
            content,
            KnowledgeSource::System,
            KnowledgeCategory::Behavioral,
            EntryContext::new(),
        )
    }

    #[test]
    fn test_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = entry("persisted across reopen");
        let b = entry("removed before reopen");

        {
            let mut store = DiskRecordStore::open(dir.path()).unwrap();
            store.append(&a).unwrap();
            store.append(&b).unwrap();
            store.append_tombstone(b.id).unwrap();
            store.sync().unwrap();
        }

        let mut store = DiskRecordStore::open(dir.path()).unwrap();
        let load = store.load().unwrap();
        assert_eq!(load.entries, vec![a]);
        assert_eq!(load.corrupt, 0);
    }

    #[test]
    fn test_log_overrides_compacted() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = entry("accessed later");

        let mut store = DiskRecordStore::open(dir.path()).unwrap();
        store.rewrite(&[&a]).unwrap();
        a.access_count = 7;
        store.append(&a).unwrap();

        let load = store.load().unwrap();
        assert_eq!(load.entries.len(), 1);
        assert_eq!(load.entries[0].access_count, 7);
    }

    #[test]
    fn test_rewrite_truncates_log() {
        let dir = tempfile::tempdir().unwrap();
        let a = entry("kept");
        let b = entry("dropped");

        let mut store = DiskRecordStore::open(dir.path()).unwrap();
        store.append(&a).unwrap();
        store.append(&b).unwrap();
        store.rewrite(&[&a]).unwrap();

        let layout = store.layout().unwrap();
        assert_eq!(fs::metadata(layout.log_path()).unwrap().len(), 0);
        assert_eq!(store.load().unwrap().entries, vec![a]);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryRecordStore::new();
        let a = entry("in memory");
        store.append(&a).unwrap();
        assert_eq!(store.appended(), 1);
        assert_eq!(store.load().unwrap().entries, vec![a.clone()]);

        store.append_tombstone(a.id).unwrap();
        assert!(store.load().unwrap().entries.is_empty());
        assert!(store.layout().is_none());
    }
}
