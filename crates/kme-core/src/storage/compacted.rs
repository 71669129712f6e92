//! Compacted store file
//!
//! `KMEC` magic, `u16` format version, `u32` record count, then each record as
//! a `u32` length followed by the codec bytes. Written to a sibling temp file
//! and renamed over the old one, so readers see either the old or the new
//! file in full.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;
use tracing::warn;

use super::codec;
use crate::domain::knowledge::KnowledgeEntry;
use crate::error::{Error, Result};

pub const MAGIC: &[u8; 4] = b"KMEC";
pub const FORMAT_VERSION: u16 = 1;

/// Entries read back from a compacted file
#[derive(Debug, Default)]
pub struct CompactedLoad {
    pub entries: Vec<KnowledgeEntry>,
    pub corrupt: usize,
}

/// Write `entries` to `path` atomically
pub fn write<'a>(path: &Path, entries: impl IntoIterator<Item = &'a KnowledgeEntry>) -> Result<usize> {
    let mut records = Vec::new();
    for entry in entries {
        records.push(codec::encode(entry)?);
    }
    let count = u32::try_from(records.len())
        .map_err(|_| Error::InvalidInput("too many records for one compacted file".to_string()))?;

    let tmp = path.with_extension("kmc.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u32::<LittleEndian>(count)?;
        for record in &records {
            writer.write_u32::<LittleEndian>(record.len() as u32)?;
            writer.write_all(record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;

    Ok(records.len())
}

/// Read a compacted file. A missing file is an empty store.
pub fn read(path: &Path) -> Result<CompactedLoad> {
    if !path.exists() {
        return Ok(CompactedLoad::default());
    }
    let bytes = fs::read(path)?;
    parse(&bytes)
}

pub fn parse(bytes: &[u8]) -> Result<CompactedLoad> {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| Error::corrupt("compacted file shorter than its header"))?;
    if &magic != MAGIC {
        return Err(Error::corrupt("compacted file has wrong magic"));
    }
    let version = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| Error::corrupt("compacted file header truncated"))?;
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(format!("unsupported compacted format version {}", version)));
    }
    let declared = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::corrupt("compacted file header truncated"))?;

    let mut load = CompactedLoad::default();
    for index in 0..declared {
        let Ok(len) = cursor.read_u32::<LittleEndian>() else {
            warn!(index, declared, "Compacted file ends early");
            load.corrupt += (declared - index) as usize;
            break;
        };
        let start = cursor.position() as usize;
        let Some(end) = start.checked_add(len as usize).filter(|end| *end <= bytes.len()) else {
            warn!(index, len, "Compacted record overruns file");
            load.corrupt += (declared - index) as usize;
            break;
        };
        cursor.set_position(end as u64);

        match codec::decode(&bytes[start..end]) {
            Ok(entry) => load.entries.push(entry),
            Err(e) => {
                warn!(index, error = %e, "Skipping corrupt compacted record");
                load.corrupt += 1;
            }
        }
    }

    Ok(load)
}
