//! Conflict detection and resolution
//!
//! Two live entries conflict when they share a category, their keyword sets
//! overlap by more than the similarity threshold (Jaccard), and their
//! confidence differs. Resolution only looks at properties of the pair, so
//! resolving A against B gives the same statuses as B against A.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use super::entry::{KnowledgeEntry, ValidationStatus};
use crate::domain::index::jaccard;

/// How a detected conflict is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Newer entry wins, older is rejected (kept for audit)
    Latest,
    /// Higher confidence wins, lower is rejected (kept for audit)
    #[default]
    HighestConfidence,
    /// Both are marked conflicted for a human to settle
    Manual,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::HighestConfidence => "highest_confidence",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "latest" => Some(Self::Latest),
            "highest_confidence" => Some(Self::HighestConfidence),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Similarity of a conflicting pair, or None when the pair does not conflict
pub fn conflict_similarity(
    a: &KnowledgeEntry,
    a_keywords: &HashSet<String>,
    b: &KnowledgeEntry,
    b_keywords: &HashSet<String>,
    threshold: f64,
) -> Option<f64> {
    if a.id == b.id
        || a.category != b.category
        || a.confidence_score == b.confidence_score
        || !a.is_live()
        || !b.is_live()
    {
        return None;
    }
    let similarity = jaccard(a_keywords, b_keywords);
    (similarity > threshold).then_some(similarity)
}

/// Outcome of settling one conflicting pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub policy: ConflictPolicy,
    pub incoming: Uuid,
    pub existing: Uuid,
    pub similarity: f64,
    /// Surviving entry, None under the manual policy
    pub winner: Option<Uuid>,
    /// Status changes the resolution applies
    pub changes: Vec<(Uuid, ValidationStatus)>,
}

impl ConflictResolution {
    pub fn rejected(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.changes
            .iter()
            .filter(|(_, s)| *s == ValidationStatus::Rejected)
            .map(|(id, _)| *id)
    }

    /// Whether `id` lost this conflict
    pub fn rejects(&self, id: Uuid) -> bool {
        self.rejected().any(|r| r == id)
    }
}

fn newer<'a>(a: &'a KnowledgeEntry, b: &'a KnowledgeEntry) -> (&'a KnowledgeEntry, &'a KnowledgeEntry) {
    if (a.timestamp, a.id) >= (b.timestamp, b.id) {
        (a, b)
    } else {
        (b, a)
    }
}

fn more_confident<'a>(
    a: &'a KnowledgeEntry,
    b: &'a KnowledgeEntry,
) -> (&'a KnowledgeEntry, &'a KnowledgeEntry) {
    if (a.confidence_score, a.timestamp, a.id) >= (b.confidence_score, b.timestamp, b.id) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Settle a conflict between `incoming` and `existing` under `policy`.
///
/// Changes the transition table forbids (for instance touching a validated
/// entry) are left out, so a validated entry is never downgraded.
pub fn resolve(
    policy: ConflictPolicy,
    incoming: &KnowledgeEntry,
    existing: &KnowledgeEntry,
    similarity: f64,
) -> ConflictResolution {
    let (winner, changes) = match policy {
        ConflictPolicy::Latest | ConflictPolicy::HighestConfidence => {
            let (winner, loser) = if policy == ConflictPolicy::Latest {
                newer(incoming, existing)
            } else {
                more_confident(incoming, existing)
            };
            let changes = allowed(loser, ValidationStatus::Rejected).into_iter().collect();
            (Some(winner.id), changes)
        }
        ConflictPolicy::Manual => {
            let changes = [incoming, existing]
                .into_iter()
                .filter_map(|e| allowed(e, ValidationStatus::Conflicted))
                .collect();
            (None, changes)
        }
    };

    ConflictResolution {
        policy,
        incoming: incoming.id,
        existing: existing.id,
        similarity,
        winner,
        changes,
    }
}

fn allowed(entry: &KnowledgeEntry, next: ValidationStatus) -> Option<(Uuid, ValidationStatus)> {
    entry
        .validation_status
        .can_transition_to(next)
        .then_some((entry.id, next))
}
