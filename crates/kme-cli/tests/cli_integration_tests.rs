//! CLI integration tests for kme
//!
//! Runs the kme binary end-to-end against a temporary store using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Isolated config and data directories for one test
struct Sandbox {
    config: TempDir,
    data: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            config: TempDir::new().unwrap(),
            data: TempDir::new().unwrap(),
        }
    }

    /// kme with this sandbox's config and store
    #[allow(deprecated)]
    fn kme(&self) -> Command {
        let mut cmd = Command::cargo_bin("kme").unwrap();
        cmd.env("KME_CONFIG_DIR", self.config.path());
        cmd.env("RUST_LOG", "kme=warn");
        cmd.arg("--data-dir").arg(self.data.path());
        cmd
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.kme().args(["--format", "json"]).args(args).output().unwrap();
        assert!(output.status.success(), "kme {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

#[test]
fn test_help_command() {
    Sandbox::new()
        .kme()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Knowledge memory engine"))
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("query"));
}

#[test]
fn test_ingest_then_query() {
    let sandbox = Sandbox::new();

    sandbox
        .kme()
        .args([
            "ingest",
            "Dimming the display saves battery power",
            "--source",
            "system",
            "--category",
            "technical",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Entry ingested"));

    sandbox
        .kme()
        .args(["query", "battery power"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dimming the display saves battery power"));
}

#[test]
fn test_query_json_records_access() {
    let sandbox = Sandbox::new();
    let receipt = sandbox.json(&["ingest", "Signal loss near the tunnel entrance", "--source", "system"]);
    assert_eq!(receipt["status"], "pending");
    let id = receipt["id"].as_str().unwrap().to_string();

    let response = sandbox.json(&["query", "tunnel signal"]);
    let hits = response["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["entry"]["id"], id.as_str());
    assert!(hits[0]["relevance"].as_f64().unwrap() > 0.0);

    // access counts are flushed by the query command
    let entry = sandbox.json(&["show", &id]);
    assert_eq!(entry["access_count"], 1);
}

#[test]
fn test_low_trust_interaction_is_rejected() {
    let sandbox = Sandbox::new();
    let receipt = sandbox.json(&["ingest", "maybe it rains", "--trust", "0"]);
    assert_eq!(receipt["status"], "rejected");

    let response = sandbox.json(&["query", "rains"]);
    assert!(response["hits"].as_array().unwrap().is_empty());
}

#[test]
fn test_stats_json() {
    let sandbox = Sandbox::new();
    sandbox
        .kme()
        .args(["--quiet", "ingest", "Crowds disperse when it rains", "--source", "system", "--category", "behavioral"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let stats = sandbox.json(&["stats"]);
    assert_eq!(stats["store"]["total"], 1);
    assert_eq!(stats["store"]["live"], 1);
    assert_eq!(stats["store"]["by_category"]["behavioral"], 1);
}

#[test]
fn test_unknown_category_fails() {
    Sandbox::new()
        .kme()
        .args(["ingest", "something", "--category", "gossip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown category 'gossip'"));
}

#[test]
fn test_show_unknown_entry_fails() {
    Sandbox::new()
        .kme()
        .args(["show", "00000000-0000-0000-0000-000000000000"])
        .assert()
        .failure();
}

#[test]
fn test_migrate_command() {
    let sandbox = Sandbox::new();
    let legacy = sandbox.data.path().join("legacy.jsonl");
    std::fs::write(
        &legacy,
        [
            r#"{"id": "k-1", "content": "Dimming saves battery power", "source": "system", "confidence": 72}"#,
            r#"{"id": "k-2", "content": "Crowds disperse when it rains", "category": "behavioral"}"#,
            r#"{"content": "no id here"}"#,
        ]
        .join("\n"),
    )
    .unwrap();
    let legacy = legacy.to_string_lossy().to_string();

    let report = sandbox.json(&["migrate", &legacy]);
    assert_eq!(report["migrated"], 2);
    assert_eq!(report["malformed"], 1);

    let again = sandbox.json(&["migrate", &legacy]);
    assert_eq!(again["migrated"], 0);
    assert_eq!(again["skipped_duplicates"], 2);

    sandbox
        .kme()
        .args(["query", "battery"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dimming saves battery power"));
}

#[test]
fn test_status_command() {
    let sandbox = Sandbox::new();
    let receipt = sandbox.json(&["ingest", "Flooding closes the east road", "--source", "environmental"]);
    let id = receipt["id"].as_str().unwrap().to_string();

    sandbox
        .kme()
        .args(["status", &id, "conflicted"])
        .assert()
        .success()
        .stdout(predicate::str::contains("conflicted"));

    let entry = sandbox.json(&["show", &id]);
    assert_eq!(entry["validation_status"], "conflicted");
}

#[test]
fn test_maintain_then_backup() {
    let sandbox = Sandbox::new();
    sandbox.json(&["ingest", "Dimming saves battery power", "--source", "system"]);

    let report = sandbox.json(&["maintain"]);
    assert_eq!(report["compacted"], 1);

    let backup = sandbox.json(&["backup"]);
    assert!(backup["path"].as_str().unwrap().ends_with(".kmc"));
}

#[test]
fn test_config_set_and_get() {
    let sandbox = Sandbox::new();

    sandbox
        .kme()
        .args(["config", "set", "store.max_entries", "1234"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set store.max_entries = 1234"));

    sandbox
        .kme()
        .args(["config", "get", "store.max_entries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1234"));

    sandbox.kme().args(["config", "reset"]).assert().success();

    sandbox
        .kme()
        .args(["config", "get", "store.max_entries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5000"));
}

#[test]
fn test_config_rejects_unknown_key() {
    Sandbox::new()
        .kme()
        .args(["config", "get", "store.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}
