//! Error types for the knowledge memory engine

use thiserror::Error;

/// Result type alias using the engine's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types with helpful messages and suggestions
///
/// Low confidence and conflicts are not errors: they surface as
/// `ValidationStatus::Rejected` and `ConflictResolution` values.
#[derive(Error, Debug)]
pub enum Error {
    // Entry errors (E001-E099)
    #[error("Entry '{0}' not found. Run `kme stats` to inspect the store.")]
    EntryNotFound(String),

    #[error("Invalid status transition for entry '{id}': {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    // Record errors (E100-E199)
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Legacy record could not be parsed at line {line}: {reason}")]
    LegacyParse { line: usize, reason: String },

    // Store errors (E200-E299)
    #[error("Store I/O failure: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // Index errors (E300-E399)
    #[error("Index is stale (generation {served} behind store version {current}). Run `kme reindex`.")]
    IndexStale { served: u64, current: u64 },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntryNotFound(_) => "E001",
            Self::InvalidTransition { .. } => "E002",
            Self::CorruptRecord(_) => "E100",
            Self::LegacyParse { .. } => "E101",
            Self::StoreIo(_) => "E200",
            Self::Serialization(_) => "E201",
            Self::IndexStale { .. } => "E300",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::EntryNotFound(_) => Some("kme stats".to_string()),
            Self::IndexStale { .. } => Some("kme reindex".to_string()),
            Self::StoreIo(_) => Some("Check permissions and free space in the data directory".to_string()),
            Self::ConfigError(_) => Some("kme config list".to_string()),
            _ => None,
        }
    }

    /// Whether the caller can simply retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreIo(_) | Self::IndexStale { .. })
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptRecord(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
