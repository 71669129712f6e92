//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::domain::knowledge::ConflictPolicy;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub query: QueryConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub max_entries: usize,
    pub confidence_threshold: u8,
    pub conflict_policy: ConflictPolicy,
    pub conflict_similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub max_keywords: usize,
    pub max_phrases: usize,
    pub cooccurrence_min_entries: usize,
    pub min_edge_strength: f64,
    pub cluster_edge_threshold: f64,
    pub cluster_min_neighbors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub default_max_results: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub compaction_interval_secs: u64,
    pub reindex_interval_secs: u64,
    pub backup_interval_secs: u64,
    pub backup_retention: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_entries: 5000,
            confidence_threshold: 55,
            conflict_policy: ConflictPolicy::HighestConfidence,
            conflict_similarity: 0.7,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_keywords: 50,
            max_phrases: 20,
            cooccurrence_min_entries: 3,
            min_edge_strength: 0.3,
            cluster_edge_threshold: 0.6,
            cluster_min_neighbors: 5,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            cache_capacity: 1000,
            cache_ttl_secs: 3600,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            compaction_interval_secs: 3600,
            reindex_interval_secs: 300,
            backup_interval_secs: 86_400,
            backup_retention: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            index: IndexConfig::default(),
            query: QueryConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kme")
}

const KEYS: &[&str] = &[
    "store.data_dir",
    "store.max_entries",
    "store.confidence_threshold",
    "store.conflict_policy",
    "store.conflict_similarity",
    "index.max_keywords",
    "index.max_phrases",
    "index.cooccurrence_min_entries",
    "index.min_edge_strength",
    "index.cluster_edge_threshold",
    "index.cluster_min_neighbors",
    "query.default_max_results",
    "query.cache_capacity",
    "query.cache_ttl_secs",
    "lifecycle.compaction_interval_secs",
    "lifecycle.reindex_interval_secs",
    "lifecycle.backup_interval_secs",
    "lifecycle.backup_retention",
];

impl Config {
    /// Config rooted at `data_dir`, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.store.data_dir = data_dir.into();
        config
    }

    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("KME_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("kme")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.max_entries == 0 {
            return Err(anyhow!("store.max_entries must be at least 1"));
        }
        if self.store.confidence_threshold > 100 {
            return Err(anyhow!("store.confidence_threshold must be between 0 and 100"));
        }
        for (key, value) in [
            ("store.conflict_similarity", self.store.conflict_similarity),
            ("index.min_edge_strength", self.index.min_edge_strength),
            ("index.cluster_edge_threshold", self.index.cluster_edge_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0.0 and 1.0", key));
            }
        }
        if self.index.max_keywords == 0 {
            return Err(anyhow!("index.max_keywords must be at least 1"));
        }
        if self.query.cache_capacity == 0 {
            return Err(anyhow!("query.cache_capacity must be at least 1"));
        }
        if self.lifecycle.backup_retention == 0 {
            return Err(anyhow!("lifecycle.backup_retention must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "store.data_dir" => self.store.data_dir.display().to_string(),
            "store.max_entries" => self.store.max_entries.to_string(),
            "store.confidence_threshold" => self.store.confidence_threshold.to_string(),
            "store.conflict_policy" => self.store.conflict_policy.to_string(),
            "store.conflict_similarity" => self.store.conflict_similarity.to_string(),

            "index.max_keywords" => self.index.max_keywords.to_string(),
            "index.max_phrases" => self.index.max_phrases.to_string(),
            "index.cooccurrence_min_entries" => self.index.cooccurrence_min_entries.to_string(),
            "index.min_edge_strength" => self.index.min_edge_strength.to_string(),
            "index.cluster_edge_threshold" => self.index.cluster_edge_threshold.to_string(),
            "index.cluster_min_neighbors" => self.index.cluster_min_neighbors.to_string(),

            "query.default_max_results" => self.query.default_max_results.to_string(),
            "query.cache_capacity" => self.query.cache_capacity.to_string(),
            "query.cache_ttl_secs" => self.query.cache_ttl_secs.to_string(),

            "lifecycle.compaction_interval_secs" => self.lifecycle.compaction_interval_secs.to_string(),
            "lifecycle.reindex_interval_secs" => self.lifecycle.reindex_interval_secs.to_string(),
            "lifecycle.backup_interval_secs" => self.lifecycle.backup_interval_secs.to_string(),
            "lifecycle.backup_retention" => self.lifecycle.backup_retention.to_string(),

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `kme config list` to see available keys.",
                    key
                ));
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "store.data_dir" => self.store.data_dir = PathBuf::from(value),
            "store.max_entries" => self.store.max_entries = parse(key, value)?,
            "store.confidence_threshold" => {
                let threshold: u8 = parse(key, value)?;
                if threshold > 100 {
                    return Err(anyhow!("Confidence threshold must be between 0 and 100"));
                }
                self.store.confidence_threshold = threshold;
            }
            "store.conflict_policy" => {
                self.store.conflict_policy = ConflictPolicy::parse(value).ok_or_else(|| {
                    anyhow!(
                        "Invalid conflict policy: {}. Valid options: latest, highest_confidence, manual",
                        value
                    )
                })?;
            }
            "store.conflict_similarity" => self.store.conflict_similarity = parse_unit(key, value)?,

            "index.max_keywords" => self.index.max_keywords = parse(key, value)?,
            "index.max_phrases" => self.index.max_phrases = parse(key, value)?,
            "index.cooccurrence_min_entries" => self.index.cooccurrence_min_entries = parse(key, value)?,
            "index.min_edge_strength" => self.index.min_edge_strength = parse_unit(key, value)?,
            "index.cluster_edge_threshold" => self.index.cluster_edge_threshold = parse_unit(key, value)?,
            "index.cluster_min_neighbors" => self.index.cluster_min_neighbors = parse(key, value)?,

            "query.default_max_results" => self.query.default_max_results = parse(key, value)?,
            "query.cache_capacity" => self.query.cache_capacity = parse(key, value)?,
            "query.cache_ttl_secs" => self.query.cache_ttl_secs = parse(key, value)?,

            "lifecycle.compaction_interval_secs" => self.lifecycle.compaction_interval_secs = parse(key, value)?,
            "lifecycle.reindex_interval_secs" => self.lifecycle.reindex_interval_secs = parse(key, value)?,
            "lifecycle.backup_interval_secs" => self.lifecycle.backup_interval_secs = parse(key, value)?,
            "lifecycle.backup_retention" => self.lifecycle.backup_retention = parse(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `kme config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

fn parse_unit(key: &str, value: &str) -> anyhow::Result<f64> {
    let parsed: f64 = parse(key, value)?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(anyhow!("{} must be between 0.0 and 1.0", key));
    }
    Ok(parsed)
}
