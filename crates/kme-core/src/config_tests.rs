//! Config module tests

use crate::config::Config;
use crate::domain::knowledge::ConflictPolicy;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.store.max_entries, 5000);
    assert_eq!(config.store.confidence_threshold, 55);
    assert_eq!(config.store.conflict_policy, ConflictPolicy::HighestConfidence);
    assert_eq!(config.store.conflict_similarity, 0.7);

    assert_eq!(config.index.max_keywords, 50);
    assert_eq!(config.index.max_phrases, 20);
    assert_eq!(config.index.cooccurrence_min_entries, 3);
    assert_eq!(config.index.min_edge_strength, 0.3);
    assert_eq!(config.index.cluster_edge_threshold, 0.6);
    assert_eq!(config.index.cluster_min_neighbors, 5);

    assert_eq!(config.query.default_max_results, 10);
    assert_eq!(config.query.cache_capacity, 1000);
    assert_eq!(config.query.cache_ttl_secs, 3600);

    assert_eq!(config.lifecycle.backup_retention, 10);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_get_set_round_trip() {
    let mut config = Config::default();

    config.set("store.max_entries", "250").unwrap();
    config.set("store.conflict_policy", "manual").unwrap();
    config.set("index.min_edge_strength", "0.45").unwrap();

    assert_eq!(config.get("store.max_entries").unwrap(), "250");
    assert_eq!(config.get("store.conflict_policy").unwrap(), "manual");
    assert_eq!(config.get("index.min_edge_strength").unwrap(), "0.45");
}

#[test]
fn test_config_set_rejects_bad_values() {
    let mut config = Config::default();

    assert!(config.set("store.confidence_threshold", "101").is_err());
    assert!(config.set("store.conflict_policy", "newest").is_err());
    assert!(config.set("index.cluster_edge_threshold", "1.5").is_err());
    assert!(config.set("query.cache_capacity", "lots").is_err());
    assert!(config.set("no.such_key", "1").is_err());
}

#[test]
fn test_config_list_covers_every_key() {
    let config = Config::default();
    let listed = config.list().unwrap();

    assert_eq!(listed.len(), 18);
    assert!(listed.iter().any(|(k, v)| k == "query.cache_ttl_secs" && v == "3600"));
}

#[test]
fn test_config_partial_toml_uses_defaults() {
    let config: Config = toml::from_str(
        r#"
        [store]
        max_entries = 42
        conflict_policy = "latest"
        "#,
    )
    .unwrap();

    assert_eq!(config.store.max_entries, 42);
    assert_eq!(config.store.conflict_policy, ConflictPolicy::Latest);
    assert_eq!(config.index.max_keywords, 50);
}

#[test]
fn test_config_validate_rejects_zero_capacity() {
    let mut config = Config::default();
    config.store.max_entries = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    // SAFETY: tests touching KME_CONFIG_DIR live only in this function
    unsafe { std::env::set_var("KME_CONFIG_DIR", dir.path()) };

    let mut config = Config::default();
    config.set("query.default_max_results", "25").unwrap();
    config.save().unwrap();

    let loaded = Config::load().unwrap();
    assert_eq!(loaded.query.default_max_results, 25);

    Config::reset().unwrap();
    assert_eq!(Config::load().unwrap(), Config::default());

    unsafe { std::env::remove_var("KME_CONFIG_DIR") };
}
