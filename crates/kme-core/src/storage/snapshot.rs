//! Index snapshot and store metadata files
//!
//! The snapshot lets a reopened engine skip a full keyword/phrase rebuild.
//! It is never authoritative: it is only used when its id table matches the
//! live entries exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::domain::index::LexicalIndex;
use crate::error::{Error, Result};

/// Bumped whenever the on-disk layout changes
pub const STORE_FORMAT_VERSION: u32 = 1;

pub const FEATURE_FLAGS: &[&str] = &["zstd-sections", "phrase-index", "cooccurrence-phrases", "relationship-graph"];

// =============================================================================
// Index Snapshot
// =============================================================================

/// Write `index` as zstd-compressed JSON
pub fn write_index(path: &Path, index: &LexicalIndex) -> Result<()> {
    let tmp = path.with_extension("zst.tmp");
    {
        let writer = BufWriter::new(File::create(&tmp)?);
        let mut encoder = zstd::stream::write::Encoder::new(writer, 3)?;
        serde_json::to_writer(&mut encoder, index)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), entries = index.len(), "Wrote index snapshot");
    Ok(())
}

/// Read a snapshot; None when the file is absent or unreadable
pub fn read_index(path: &Path) -> Option<LexicalIndex> {
    if !path.exists() {
        return None;
    }
    match decode_index(path) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable index snapshot");
            None
        }
    }
}

fn decode_index(path: &Path) -> Result<LexicalIndex> {
    let file = File::open(path)?;
    let decoder = zstd::stream::read::Decoder::new(file)?;
    Ok(serde_json::from_reader(decoder)?)
}

// =============================================================================
// Store Metadata
// =============================================================================

/// Small descriptor written next to the store files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: u32,
    pub feature_flags: Vec<String>,
    pub entry_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl StoreMetadata {
    pub fn current(entry_count: usize) -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            feature_flags: FEATURE_FLAGS.iter().map(|f| f.to_string()).collect(),
            entry_count,
            updated_at: Utc::now(),
        }
    }
}

pub fn write_metadata(path: &Path, metadata: &StoreMetadata) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, metadata)
        .map_err(|e| Error::Serialization(format!("Failed to write metadata: {}", e)))?;
    Ok(())
}

pub fn read_metadata(path: &Path) -> Result<Option<StoreMetadata>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let metadata = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Serialization(format!("Failed to read metadata: {}", e)))?;
    Ok(Some(metadata))
}
