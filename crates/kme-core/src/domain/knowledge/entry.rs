//! Knowledge entry model
//!
//! A `KnowledgeEntry` is one immutable unit of learned information plus the
//! small amount of mutable bookkeeping the engine attaches to it (validation
//! status and retrieval telemetry).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where a piece of knowledge came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    Interaction,
    Environmental,
    System,
    External,
}

impl KnowledgeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::Environmental => "environmental",
            Self::System => "system",
            Self::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "interaction" => Some(Self::Interaction),
            "environmental" => Some(Self::Environmental),
            "system" => Some(Self::System),
            "external" => Some(Self::External),
            _ => None,
        }
    }

    pub fn all() -> &'static [KnowledgeSource] {
        &[
            Self::Interaction,
            Self::Environmental,
            Self::System,
            Self::External,
        ]
    }

    /// On-disk code. `from_code(s.code()) == Some(s)` for every variant.
    pub fn code(&self) -> u8 {
        match self {
            Self::Interaction => 0,
            Self::Environmental => 1,
            Self::System => 2,
            Self::External => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Interaction),
            1 => Some(Self::Environmental),
            2 => Some(Self::System),
            3 => Some(Self::External),
            _ => None,
        }
    }
}

impl fmt::Display for KnowledgeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subject area of a piece of knowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    Tactical,
    Technical,
    Behavioral,
    Strategic,
    Environmental,
}

impl KnowledgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tactical => "tactical",
            Self::Technical => "technical",
            Self::Behavioral => "behavioral",
            Self::Strategic => "strategic",
            Self::Environmental => "environmental",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tactical" => Some(Self::Tactical),
            "technical" => Some(Self::Technical),
            "behavioral" | "behavioural" => Some(Self::Behavioral),
            "strategic" => Some(Self::Strategic),
            "environmental" => Some(Self::Environmental),
            _ => None,
        }
    }

    pub fn all() -> &'static [KnowledgeCategory] {
        &[
            Self::Tactical,
            Self::Technical,
            Self::Behavioral,
            Self::Strategic,
            Self::Environmental,
        ]
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Tactical => 0,
            Self::Technical => 1,
            Self::Behavioral => 2,
            Self::Strategic => 3,
            Self::Environmental => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Tactical),
            1 => Some(Self::Technical),
            2 => Some(Self::Behavioral),
            3 => Some(Self::Strategic),
            4 => Some(Self::Environmental),
            _ => None,
        }
    }
}

impl fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validation state of an entry
///
/// Allowed transitions: pending -> {validated, rejected, conflicted} and
/// conflicted -> {validated, rejected}. Everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Validated,
    Rejected,
    Conflicted,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Conflicted => "conflicted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "rejected" => Some(Self::Rejected),
            "conflicted" => Some(Self::Conflicted),
            _ => None,
        }
    }

    pub fn all() -> &'static [ValidationStatus] {
        &[
            Self::Pending,
            Self::Validated,
            Self::Rejected,
            Self::Conflicted,
        ]
    }

    pub fn can_transition_to(&self, next: ValidationStatus) -> bool {
        use ValidationStatus::*;
        matches!(
            (self, next),
            (Pending, Validated | Rejected | Conflicted) | (Conflicted, Validated | Rejected)
        )
    }

    /// Rejected entries are kept for audit but never indexed or returned
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata supplied by the collaborator that produced the knowledge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_payload: Option<serde_json::Value>,
}

impl EntryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust is clamped to 0-100
    pub fn with_trust_level(mut self, trust: u8) -> Self {
        self.trust_level = Some(trust.min(100));
        self
    }

    pub fn with_emotional_label(mut self, label: impl Into<String>) -> Self {
        self.emotional_label = Some(label.into().to_lowercase());
        self
    }

    pub fn with_sensor_payload(mut self, payload: serde_json::Value) -> Self {
        self.sensor_payload = Some(payload);
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.trust_level = self.trust_level.map(|t| t.min(100));
        self.emotional_label = self
            .emotional_label
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty());
        self
    }
}

/// One unit of stored knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: KnowledgeSource,
    pub category: KnowledgeCategory,
    pub content: String,
    pub confidence_score: u8,
    pub validation_status: ValidationStatus,
    pub context: EntryContext,
    /// Soft references; ids may dangle after eviction
    pub relationships: BTreeSet<Uuid>,
    pub utility_score: u8,
    pub access_count: u32,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Id of the record this entry was migrated from, if any
    pub origin_id: Option<String>,
}

impl KnowledgeEntry {
    pub fn new(
        content: impl Into<String>,
        source: KnowledgeSource,
        category: KnowledgeCategory,
        context: EntryContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now_millis(),
            source,
            category,
            content: content.into(),
            confidence_score: 0,
            validation_status: ValidationStatus::Pending,
            context: context.normalized(),
            relationships: BTreeSet::new(),
            utility_score: 0,
            access_count: 0,
            last_accessed: None,
            origin_id: None,
        }
    }

    /// Timestamps are stored at millisecond precision
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = truncate_millis(timestamp);
        self
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence_score = confidence.min(100);
        self
    }

    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.validation_status = status;
        self
    }

    pub fn with_origin_id(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    pub fn with_relationship(mut self, other: Uuid) -> Self {
        if other != self.id {
            self.relationships.insert(other);
        }
        self
    }

    /// Move to `next`, enforcing the transition table
    pub fn transition(&mut self, next: ValidationStatus) -> Result<()> {
        if self.validation_status == next {
            return Ok(());
        }
        if !self.validation_status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: self.id.to_string(),
                from: self.validation_status.as_str(),
                to: next.as_str(),
            });
        }
        self.validation_status = next;
        Ok(())
    }

    /// Record a successful retrieval
    pub fn record_access(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.utility_score = self.utility_score.saturating_add(1);
        self.last_accessed = Some(truncate_millis(at));
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.timestamp).num_milliseconds().max(0);
        millis as f64 / 86_400_000.0
    }

    pub fn is_live(&self) -> bool {
        self.validation_status.is_live()
    }
}

pub(crate) fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_codes_are_inverse() {
        for category in KnowledgeCategory::all() {
            assert_eq!(KnowledgeCategory::from_code(category.code()), Some(*category));
            assert_eq!(KnowledgeCategory::parse(category.as_str()), Some(*category));
        }
        assert_eq!(KnowledgeCategory::from_code(5), None);
    }

    #[test]
    fn test_source_codes_are_inverse() {
        for source in KnowledgeSource::all() {
            assert_eq!(KnowledgeSource::from_code(source.code()), Some(*source));
            assert_eq!(KnowledgeSource::parse(source.as_str()), Some(*source));
        }
        assert_eq!(KnowledgeSource::from_code(4), None);
    }

    #[test]
    fn test_status_transitions() {
        use ValidationStatus::*;
        assert!(Pending.can_transition_to(Validated));
        assert!(Pending.can_transition_to(Conflicted));
        assert!(Conflicted.can_transition_to(Rejected));
        assert!(!Validated.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Validated));
        assert!(!Conflicted.can_transition_to(Pending));
    }

    #[test]
    fn test_transition_error() {
        let mut entry = KnowledgeEntry::new(
            "content",
            KnowledgeSource::System,
            KnowledgeCategory::Technical,
            EntryContext::new(),
        )
        .with_status(ValidationStatus::Validated);

        let err = entry.transition(ValidationStatus::Pending).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(entry.validation_status, ValidationStatus::Validated);
    }

    #[test]
    fn test_context_trust_clamped() {
        let ctx = EntryContext::new().with_trust_level(250);
        assert_eq!(ctx.trust_level, Some(100));

        let raw = EntryContext {
            trust_level: Some(180),
            emotional_label: Some("  Focused ".into()),
            sensor_payload: None,
        };
        let normalized = raw.normalized();
        assert_eq!(normalized.trust_level, Some(100));
        assert_eq!(normalized.emotional_label.as_deref(), Some("focused"));
    }

    #[test]
    fn test_record_access_saturates() {
        let mut entry = KnowledgeEntry::new(
            "content",
            KnowledgeSource::System,
            KnowledgeCategory::Technical,
            EntryContext::new(),
        );
        entry.utility_score = 255;
        entry.record_access(Utc::now());
        assert_eq!(entry.utility_score, 255);
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed.is_some());
    }

    #[test]
    fn test_self_relationship_ignored() {
        let entry = KnowledgeEntry::new(
            "content",
            KnowledgeSource::System,
            KnowledgeCategory::Technical,
            EntryContext::new(),
        );
        let id = entry.id;
        let entry = entry.with_relationship(id).with_relationship(Uuid::new_v4());
        assert_eq!(entry.relationships.len(), 1);
    }
}
