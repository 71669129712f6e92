//! Confidence rubric for newly ingested knowledge

use regex::Regex;
use std::sync::LazyLock;

use super::entry::{EntryContext, KnowledgeSource};

const BASE_SCORE: i32 = 50;
const DEFAULT_TRUST: u8 = 50;
const QUALITY_BONUS: i32 = 5;
const EMOTION_BONUS: i32 = 10;

/// Phrasing that tends to accompany well-founded observations.
/// Each group contributes at most once.
static QUALITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let patterns = [
        // causal connectives
        r"(?i)\b(because|therefore|consequently|as a result|due to)\b",
        // discovery verbs
        r"(?i)\b(discovered|found|learned|observed|identified|realized)\b",
        // frequency adverbs
        r"(?i)\b(always|usually|often|frequently|consistently|never)\b",
        // solution nouns
        r"(?i)\b(solution|fix|workaround|remedy|resolution)\b",
    ];

    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
});

const FOCUSED_LABELS: &[&str] = &["focused", "analytical"];

/// Per-component breakdown of a confidence score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfidenceBreakdown {
    pub base: i32,
    pub source: i32,
    pub length: i32,
    pub quality: i32,
    pub emotion: i32,
}

impl ConfidenceBreakdown {
    /// Sum clamped to 0-100
    pub fn total(&self) -> u8 {
        (self.base + self.source + self.length + self.quality + self.emotion).clamp(0, 100) as u8
    }
}

/// Scores content by source reliability, length, quality phrasing and the
/// collaborator's emotional label. Entries below `threshold` are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfidenceRubric {
    pub threshold: u8,
}

impl Default for ConfidenceRubric {
    fn default() -> Self {
        Self { threshold: 55 }
    }
}

impl ConfidenceRubric {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.min(100),
        }
    }

    pub fn breakdown(
        &self,
        content: &str,
        source: KnowledgeSource,
        context: &EntryContext,
    ) -> ConfidenceBreakdown {
        let source_bonus = match source {
            KnowledgeSource::System => 30,
            KnowledgeSource::Environmental => 20,
            KnowledgeSource::External => 10,
            KnowledgeSource::Interaction => {
                let trust = context.trust_level.unwrap_or(DEFAULT_TRUST).min(100);
                (0.4 * f64::from(trust)).round() as i32
            }
        };

        let chars = content.chars().count();
        let mut length = 0;
        if chars > 100 {
            length += 10;
        }
        if chars > 500 {
            length += 10;
        }

        let quality = QUALITY_PATTERNS
            .iter()
            .filter(|p| p.is_match(content))
            .count() as i32
            * QUALITY_BONUS;

        let emotion = match context.emotional_label.as_deref() {
            Some(label) if FOCUSED_LABELS.contains(&label.to_lowercase().as_str()) => EMOTION_BONUS,
            _ => 0,
        };

        ConfidenceBreakdown {
            base: BASE_SCORE,
            source: source_bonus,
            length,
            quality,
            emotion,
        }
    }

    pub fn score(&self, content: &str, source: KnowledgeSource, context: &EntryContext) -> u8 {
        self.breakdown(content, source, context).total()
    }

    pub fn accepts(&self, confidence: u8) -> bool {
        confidence >= self.threshold
    }
}
