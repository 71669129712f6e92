//! Legacy line-delimited knowledge records
//!
//! One JSON object per line. `id` and `content` are required; `source`,
//! `category`, `confidence`, `timestamp`, `context` and `relationships` are
//! optional. Blank lines and lines starting with `#` are ignored.
//!
//! `relationships` lists the legacy ids of linked records. They are resolved
//! to entry ids once the whole file has been read, so a record may point at
//! one further down.
//!
//! ```text
//! {"id": "k-17", "content": "Dimming saves power", "category": "technical",
//!  "source": "system", "confidence": 72, "timestamp": "2024-03-01T10:00:00Z",
//!  "context": {"trust_level": 80, "emotional_label": "focused"},
//!  "relationships": ["k-3", 12]}
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::domain::knowledge::{EntryContext, KnowledgeCategory, KnowledgeEntry, KnowledgeSource};
use crate::error::{Error, Result};

/// One parsed legacy record
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRecord {
    pub line: usize,
    pub origin_id: String,
    pub content: String,
    pub source: KnowledgeSource,
    pub category: KnowledgeCategory,
    /// Kept as-is (clamped) when present, otherwise the rubric scores it
    pub confidence: Option<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub context: EntryContext,
    /// Legacy ids of linked records, unresolved
    pub relationships: Vec<String>,
}

impl LegacyRecord {
    /// Build the entry this record migrates to. Confidence is left at zero
    /// when the record carried none.
    pub fn to_entry(&self) -> KnowledgeEntry {
        let mut entry = KnowledgeEntry::new(
            self.content.clone(),
            self.source,
            self.category,
            self.context.clone(),
        )
        .with_origin_id(self.origin_id.clone());
        if let Some(timestamp) = self.timestamp {
            entry = entry.with_timestamp(timestamp);
        }
        if let Some(confidence) = self.confidence {
            entry = entry.with_confidence(confidence);
        }
        entry
    }
}

fn malformed(line: usize, reason: impl Into<String>) -> Error {
    Error::LegacyParse {
        line,
        reason: reason.into(),
    }
}

fn clamp_score(value: &Value) -> Option<u8> {
    value.as_f64().map(|v| v.round().clamp(0.0, 100.0) as u8)
}

fn parse_timestamp(line: usize, value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| malformed(line, format!("bad timestamp '{}': {}", s, e))),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| malformed(line, format!("bad timestamp {}", n))),
        other => Err(malformed(line, format!("bad timestamp {}", other))),
    }
}

fn parse_relationships(line: usize, value: Option<&Value>) -> Result<Vec<String>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(malformed(line, format!("bad relationships {}", other))),
    };
    let mut origins = Vec::with_capacity(items.len());
    for item in items {
        let origin = match item {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => return Err(malformed(line, format!("bad relationship id {}", other))),
        };
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }
    Ok(origins)
}

fn parse_context(value: Option<&Value>) -> EntryContext {
    let Some(Value::Object(map)) = value else {
        return EntryContext::new();
    };
    EntryContext {
        trust_level: map.get("trust_level").or_else(|| map.get("trust")).and_then(clamp_score),
        emotional_label: map
            .get("emotional_label")
            .or_else(|| map.get("emotion"))
            .and_then(Value::as_str)
            .map(str::to_string),
        sensor_payload: map
            .get("sensor_payload")
            .or_else(|| map.get("sensor_data"))
            .filter(|v| !v.is_null())
            .cloned(),
    }
    .normalized()
}

/// Parse one line. `None` for lines that carry no record.
pub fn parse_line(line: usize, text: &str) -> Option<Result<LegacyRecord>> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    Some(parse_record(line, trimmed))
}

fn parse_record(line: usize, text: &str) -> Result<LegacyRecord> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| malformed(line, format!("invalid JSON: {}", e)))?;
    let Value::Object(map) = &value else {
        return Err(malformed(line, "record is not a JSON object"));
    };

    let origin_id = match map.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(malformed(line, "missing id")),
    };
    let content = match map.get("content").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => return Err(malformed(line, "missing content")),
    };

    let source = match map.get("source").and_then(Value::as_str) {
        None => KnowledgeSource::External,
        Some(s) => KnowledgeSource::parse(s)
            .ok_or_else(|| malformed(line, format!("unknown source '{}'", s)))?,
    };
    let category = match map.get("category").and_then(Value::as_str) {
        None => KnowledgeCategory::Technical,
        Some(s) => KnowledgeCategory::parse(s)
            .ok_or_else(|| malformed(line, format!("unknown category '{}'", s)))?,
    };

    let timestamp = match map.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_timestamp(line, v)?),
    };

    let relationships = parse_relationships(line, map.get("relationships"))?;

    Ok(LegacyRecord {
        line,
        origin_id,
        content,
        source,
        category,
        confidence: map.get("confidence").and_then(clamp_score),
        timestamp,
        context: parse_context(map.get("context")),
        relationships,
    })
}

/// Streams records from a legacy file, numbering lines from 1
pub struct LegacyReader {
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl LegacyReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }
}

impl Iterator for LegacyReader {
    type Item = Result<LegacyRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(Error::StoreIo(e))),
            };
            self.line += 1;
            if let Some(record) = parse_line(self.line, &text) {
                return Some(record);
            }
        }
    }
}
