//! Binary record codec
//!
//! ```text
//! offset  size  field
//! 0       16    entry id (uuid bytes)
//! 16      8     timestamp, ms since epoch (i64 LE)
//! 24      1     confidence
//! 25      1     utility
//! 26      1     category code
//! 27      1     source code
//! 28      4     access count (u32 LE)
//! 32      4+n   content      (u32 LE length, zstd)
//! ..      4+n   context      (u32 LE length, zstd JSON)
//! ..      4+16k relationships (u32 LE byte length, raw uuids)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use uuid::Uuid;

use crate::domain::knowledge::{
    EntryContext, KnowledgeCategory, KnowledgeEntry, KnowledgeSource, ValidationStatus,
};
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 32;
const COMPRESSION_LEVEL: i32 = 3;

/// Fields with no room in the fixed header
#[derive(Debug, Serialize, Deserialize)]
struct ContextSection {
    #[serde(default)]
    context: EntryContext,
    #[serde(default)]
    status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_accessed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_id: Option<String>,
}

/// Encode an entry into its on-disk form
pub fn encode(entry: &KnowledgeEntry) -> Result<Vec<u8>> {
    let content = zstd::stream::encode_all(entry.content.as_bytes(), COMPRESSION_LEVEL)?;

    let section = ContextSection {
        context: entry.context.clone(),
        status: entry.validation_status,
        last_accessed: entry.last_accessed,
        origin_id: entry.origin_id.clone(),
    };
    let context_json = serde_json::to_vec(&section)?;
    let context = zstd::stream::encode_all(context_json.as_slice(), COMPRESSION_LEVEL)?;

    let relationships_len = entry.relationships.len() * 16;
    let mut buf =
        Vec::with_capacity(HEADER_LEN + 12 + content.len() + context.len() + relationships_len);

    buf.extend_from_slice(entry.id.as_bytes());
    buf.write_i64::<LittleEndian>(entry.timestamp.timestamp_millis())?;
    buf.write_u8(entry.confidence_score.min(100))?;
    buf.write_u8(entry.utility_score)?;
    buf.write_u8(entry.category.code())?;
    buf.write_u8(entry.source.code())?;
    buf.write_u32::<LittleEndian>(entry.access_count)?;

    write_section(&mut buf, &content)?;
    write_section(&mut buf, &context)?;

    buf.write_u32::<LittleEndian>(section_len(relationships_len)?)?;
    for id in &entry.relationships {
        buf.extend_from_slice(id.as_bytes());
    }

    Ok(buf)
}

fn section_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::InvalidInput(format!("section of {} bytes is too large", len)))
}

fn write_section(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    buf.write_u32::<LittleEndian>(section_len(bytes.len())?)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Decode an entry; any structural problem is a `CorruptRecord`
pub fn decode(bytes: &[u8]) -> Result<KnowledgeEntry> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::corrupt(format!(
            "record is {} bytes, header needs {}",
            bytes.len(),
            HEADER_LEN
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut id_bytes = [0u8; 16];
    cursor.read_exact(&mut id_bytes).map_err(truncated)?;
    let id = Uuid::from_bytes(id_bytes);

    let millis = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::corrupt(format!("timestamp {} out of range", millis)))?;
    let confidence = cursor.read_u8().map_err(truncated)?;
    let utility = cursor.read_u8().map_err(truncated)?;
    let category_code = cursor.read_u8().map_err(truncated)?;
    let source_code = cursor.read_u8().map_err(truncated)?;
    let access_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

    let category = KnowledgeCategory::from_code(category_code)
        .ok_or_else(|| Error::corrupt(format!("unknown category code {}", category_code)))?;
    let source = KnowledgeSource::from_code(source_code)
        .ok_or_else(|| Error::corrupt(format!("unknown source code {}", source_code)))?;
    if confidence > 100 {
        return Err(Error::corrupt(format!("confidence {} above 100", confidence)));
    }

    let content_raw = read_section(&mut cursor, "content")?;
    let content = zstd::stream::decode_all(content_raw)
        .map_err(|e| Error::corrupt(format!("content decompression failed: {}", e)))?;
    let content = String::from_utf8(content)
        .map_err(|e| Error::corrupt(format!("content is not UTF-8: {}", e)))?;

    let context_raw = read_section(&mut cursor, "context")?;
    let context_json = zstd::stream::decode_all(context_raw)
        .map_err(|e| Error::corrupt(format!("context decompression failed: {}", e)))?;
    let section: ContextSection = serde_json::from_slice(&context_json)
        .map_err(|e| Error::corrupt(format!("context is not valid JSON: {}", e)))?;

    let relationship_bytes = read_section(&mut cursor, "relationships")?;
    if relationship_bytes.len() % 16 != 0 {
        return Err(Error::corrupt(format!(
            "relationship section of {} bytes is not a multiple of 16",
            relationship_bytes.len()
        )));
    }
    let relationships: BTreeSet<Uuid> = relationship_bytes
        .chunks_exact(16)
        .filter_map(|chunk| Uuid::from_slice(chunk).ok())
        .collect();

    if (cursor.position() as usize) != bytes.len() {
        return Err(Error::corrupt(format!(
            "{} trailing bytes after record",
            bytes.len() - cursor.position() as usize
        )));
    }

    Ok(KnowledgeEntry {
        id,
        timestamp,
        source,
        category,
        content,
        confidence_score: confidence,
        validation_status: section.status,
        context: section.context,
        relationships,
        utility_score: utility,
        access_count,
        last_accessed: section.last_accessed,
        origin_id: section.origin_id,
    })
}

fn truncated(_: std::io::Error) -> Error {
    Error::corrupt("record header truncated")
}

fn read_section<'a>(cursor: &mut Cursor<&'a [u8]>, name: &str) -> Result<&'a [u8]> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::corrupt(format!("{} length prefix missing", name)))? as usize;
    let start = cursor.position() as usize;
    let buf: &'a [u8] = *cursor.get_ref();
    let end = start
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            Error::corrupt(format!(
                "{} section declares {} bytes, only {} remain",
                name,
                len,
                buf.len().saturating_sub(start)
            ))
        })?;
    cursor.set_position(end as u64);
    Ok(&buf[start..end])
}
