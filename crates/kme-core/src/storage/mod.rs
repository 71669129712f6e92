//! Storage layer - binary records, append log, compacted file
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//!   knowledge.log          append log of upsert/tombstone frames
//!   knowledge.kmc          compacted store (rewritten by compaction/eviction)
//!   index.snapshot.zst     keyword/phrase index snapshot
//!   metadata.json          version, feature flags, entry count
//!   backups/
//!     store-<UTC>.kmc      newest N copies of knowledge.kmc
//! ```
//!
//! # Modules
//!
//! - `codec`: entry <-> binary record
//! - `log`: checksummed append log
//! - `compacted`: whole-store file written by compaction
//! - `repository`: `RecordStore` trait with disk and memory backends
//! - `snapshot`: index snapshot and metadata files
//! - `backup`: rotation of timestamped store copies
//! - `legacy`: reader for the line-delimited legacy format

pub mod backup;
pub mod codec;
pub mod compacted;
pub mod legacy;
pub mod log;
pub mod repository;
pub mod snapshot;

use std::path::{Path, PathBuf};

pub use backup::BackupReport;
pub use legacy::{LegacyReader, LegacyRecord};
pub use repository::{DiskRecordStore, MemoryRecordStore, RecordStore, StoreLoad};
pub use snapshot::StoreMetadata;

pub const LOG_FILE: &str = "knowledge.log";
pub const COMPACTED_FILE: &str = "knowledge.kmc";
pub const INDEX_SNAPSHOT_FILE: &str = "index.snapshot.zst";
pub const METADATA_FILE: &str = "metadata.json";
pub const BACKUP_DIR: &str = "backups";

/// Paths of every file the engine keeps in its data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    dir: PathBuf,
}

impl DataLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn compacted_path(&self) -> PathBuf {
        self.dir.join(COMPACTED_FILE)
    }

    pub fn index_snapshot_path(&self) -> PathBuf {
        self.dir.join(INDEX_SNAPSHOT_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }
}
