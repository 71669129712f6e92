//! KME Core Integration Tests

use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::io::Write;
use tempfile::TempDir;
use uuid::Uuid;

use kme_core::{
    config::Config,
    domain::knowledge::{
        ConfidenceRubric, ConflictPolicy, EntryContext, KnowledgeCategory, KnowledgeEntry, KnowledgeSource,
        KnowledgeStore, StoreSettings, ValidationStatus,
    },
    domain::query::KnowledgeQuery,
    engine::KnowledgeEngine,
    storage::{DataLayout, MemoryRecordStore, codec},
};

fn write_legacy(dir: &TempDir, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.path().join("legacy.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

#[test]
fn test_codec_round_trip_full_entry() {
    let mut entry = KnowledgeEntry::new(
        "Dimming the display because ambient light is low saves battery power",
        KnowledgeSource::Environmental,
        KnowledgeCategory::Environmental,
        EntryContext::new()
            .with_trust_level(64)
            .with_emotional_label("analytical")
            .with_sensor_payload(serde_json::json!({"lux": 12, "tags": ["indoor"]})),
    )
    .with_confidence(83)
    .with_status(ValidationStatus::Validated)
    .with_origin_id("legacy-42")
    .with_relationship(Uuid::new_v4())
    .with_relationship(Uuid::new_v4());
    entry.utility_score = 250;
    entry.record_access(Utc::now());

    let decoded = codec::decode(&codec::encode(&entry).unwrap()).unwrap();
    assert_eq!(decoded, entry);
}

async fn indexed_contents(engine: &KnowledgeEngine) -> BTreeSet<String> {
    let mut contents = BTreeSet::new();
    for query in ["battery", "crowds", "tunnel"] {
        for hit in engine.query(&KnowledgeQuery::new(query)).await.unwrap().hits {
            contents.insert(hit.entry.content);
        }
    }
    contents
}

async fn only_hit(engine: &KnowledgeEngine, word: &str) -> KnowledgeEntry {
    let mut hits = engine.query(&KnowledgeQuery::new(word)).await.unwrap().hits;
    assert_eq!(hits.len(), 1, "{}", word);
    hits.remove(0).entry
}

#[tokio::test]
async fn test_migration_is_idempotent_on_disk() {
    let dir = TempDir::new().unwrap();
    let legacy = write_legacy(
        &dir,
        &[
            r#"{"id": "k-1", "content": "Dimming saves battery power", "source": "system", "confidence": 72}"#,
            r#"{"id": "k-2", "content": "Crowds disperse when it rains", "category": "behavioral"}"#,
            "this line is not json",
            r#"{"id": "k-3", "content": "Signal loss near the tunnel", "category": "environmental", "confidence": 90}"#,
        ],
    );
    let config = Config::with_data_dir(dir.path().join("data"));

    let (first_count, first_contents) = {
        let engine = KnowledgeEngine::open(&config).unwrap();
        let report = engine.migrate_from_legacy(&legacy).await.unwrap();
        assert_eq!(report.migrated, 3);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.skipped_duplicates, 0);

        let again = engine.migrate_from_legacy(&legacy).await.unwrap();
        assert_eq!(again.migrated, 0);
        assert_eq!(again.skipped_duplicates, 3);
        assert_eq!(again.malformed, 1);

        (engine.stats().await.store.total, indexed_contents(&engine).await)
    };

    let engine = KnowledgeEngine::open(&config).unwrap();
    let report = engine.migrate_from_legacy(&legacy).await.unwrap();
    assert_eq!(report.migrated, 0);
    assert_eq!(engine.stats().await.store.total, first_count);
    assert_eq!(first_count, 3);
    assert_eq!(indexed_contents(&engine).await, first_contents);
}

#[tokio::test]
async fn test_migrated_relationships_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let legacy = write_legacy(
        &dir,
        &[
            r#"{"id": "k-1", "content": "Dimming saves battery power", "source": "system", "relationships": ["k-2", "k-9"]}"#,
            r#"{"id": "k-2", "content": "Signal loss near the tunnel", "source": "system"}"#,
        ],
    );
    let config = Config::with_data_dir(dir.path().join("data"));

    {
        let engine = KnowledgeEngine::open(&config).unwrap();
        let report = engine.migrate_from_legacy(&legacy).await.unwrap();
        assert_eq!(report.migrated, 2);
        assert_eq!(report.linked, 1);
        assert_eq!(report.unresolved_links, 1);
    }

    let engine = KnowledgeEngine::open(&config).unwrap();
    let battery = only_hit(&engine, "battery").await;
    let tunnel = only_hit(&engine, "tunnel").await;
    assert_eq!(battery.origin_id.as_deref(), Some("k-1"));
    assert_eq!(battery.relationships, BTreeSet::from([tunnel.id]));
    assert!(tunnel.relationships.is_empty());
}

#[test]
fn test_confidence_always_within_bounds() {
    let rubric = ConfidenceRubric::default();
    let long = "We discovered the fix because sensors usually drift. ".repeat(20);
    let labels = [None, Some("focused"), Some("analytical"), Some("anxious")];

    for source in KnowledgeSource::all() {
        for trust in (0..=100u8).step_by(5) {
            for label in labels {
                for content in ["", "short", long.as_str()] {
                    let mut context = EntryContext::new().with_trust_level(trust);
                    if let Some(label) = label {
                        context = context.with_emotional_label(label);
                    }
                    let score = rubric.score(content, *source, &context);
                    assert!(score <= 100, "{:?} {} {:?} -> {}", source, trust, label, score);
                }
            }
        }
    }
}

fn resolve_in_order(policy: ConflictPolicy, first: &KnowledgeEntry, second: &KnowledgeEntry) -> Vec<(Uuid, ValidationStatus)> {
    let settings = StoreSettings {
        conflict_policy: policy,
        ..StoreSettings::default()
    };
    let mut store = KnowledgeStore::open(Box::new(MemoryRecordStore::new()), settings).unwrap();
    store.insert(first.clone()).unwrap();
    store.insert(second.clone()).unwrap();
    store.entries().map(|e| (e.id, e.validation_status)).collect()
}

#[test]
fn test_conflict_resolution_is_order_independent() {
    let now = Utc::now();
    let a = KnowledgeEntry::new(
        "battery optimization through display dimming",
        KnowledgeSource::System,
        KnowledgeCategory::Technical,
        EntryContext::new(),
    )
    .with_confidence(70)
    .with_timestamp(now - Duration::minutes(5));
    let b = KnowledgeEntry::new(
        "battery optimization through display dimming",
        KnowledgeSource::System,
        KnowledgeCategory::Technical,
        EntryContext::new(),
    )
    .with_confidence(85)
    .with_timestamp(now);

    for policy in [ConflictPolicy::Latest, ConflictPolicy::HighestConfidence, ConflictPolicy::Manual] {
        let forward = resolve_in_order(policy, &a, &b);
        let backward = resolve_in_order(policy, &b, &a);
        assert_eq!(forward, backward, "policy {}", policy);
    }

    let outcome = resolve_in_order(ConflictPolicy::HighestConfidence, &a, &b);
    assert!(outcome.contains(&(a.id, ValidationStatus::Rejected)));
    assert!(outcome.contains(&(b.id, ValidationStatus::Pending)));

    let manual = resolve_in_order(ConflictPolicy::Manual, &b, &a);
    assert!(manual.iter().all(|(_, status)| *status == ValidationStatus::Conflicted));
}

#[tokio::test]
async fn test_more_overlap_never_ranks_lower() {
    let engine = KnowledgeEngine::in_memory(&Config::default()).unwrap();
    let mut ids = Vec::new();
    for content in [
        "battery thermal drain",
        "battery thermal overnight",
        "battery swap overnight",
        "crowd morale overnight",
    ] {
        let receipt = engine
            .ingest(content, KnowledgeSource::System, KnowledgeCategory::Technical, EntryContext::new())
            .await
            .unwrap();
        assert!(!receipt.is_rejected());
        ids.push(receipt.id);
    }
    engine.rebuild_indices().await.unwrap();

    let response = engine
        .query(&KnowledgeQuery::new("battery thermal drain"))
        .await
        .unwrap();
    let ranked: Vec<Uuid> = response.hits.iter().map(|h| h.entry.id).collect();
    assert_eq!(ranked, ids[..3].to_vec());
    assert!(response.hits.windows(2).all(|w| w[0].relevance > w[1].relevance));
}

#[tokio::test]
async fn test_more_overlap_wins_over_shorter_entry() {
    let engine = KnowledgeEngine::in_memory(&Config::default()).unwrap();
    let filler: Vec<String> = (0..40).map(|i| format!("filler{i}")).collect();

    let long = engine
        .ingest(
            format!("anchor bridge canyon delta {}", filler.join(" ")),
            KnowledgeSource::System,
            KnowledgeCategory::Technical,
            EntryContext::new(),
        )
        .await
        .unwrap();
    let short = engine
        .ingest("anchor bridge canyon", KnowledgeSource::System, KnowledgeCategory::Technical, EntryContext::new())
        .await
        .unwrap();
    assert_eq!(long.confidence, 90);
    assert_eq!(short.confidence, 80);
    engine.rebuild_indices().await.unwrap();

    let response = engine
        .query(&KnowledgeQuery::new(
            "anchor bridge canyon delta ember falcon glacier harbor island jungle",
        ))
        .await
        .unwrap();
    let ranked: Vec<Uuid> = response.hits.iter().map(|h| h.entry.id).collect();
    assert_eq!(ranked, vec![long.id, short.id]);
    assert!(response.hits[0].relevance < response.hits[1].relevance);
}

#[tokio::test]
async fn test_cluster_members_meet_threshold() {
    let engine = KnowledgeEngine::in_memory(&Config::default()).unwrap();
    let context = || EntryContext::new().with_trust_level(80).with_emotional_label("focused");

    engine
        .ingest("battery thermal drain", KnowledgeSource::System, KnowledgeCategory::Technical, context())
        .await
        .unwrap();
    for i in 0..6 {
        engine
            .ingest(
                format!("battery thermal drain spoke{i}"),
                KnowledgeSource::System,
                KnowledgeCategory::Technical,
                context(),
            )
            .await
            .unwrap();
    }
    engine.rebuild_graph().await.unwrap();

    let clusters = engine.clusters();
    assert!(!clusters.is_empty());
    for cluster in clusters.iter() {
        assert!(cluster.len() >= 6);
        let neighbors = engine.neighbors(&cluster.center);
        for member in &cluster.members[1..] {
            let strength = neighbors
                .iter()
                .find(|(id, _)| id == member)
                .map(|(_, s)| *s)
                .unwrap();
            assert!(strength > 0.6);
        }
    }
}

#[test]
fn test_eviction_keeps_best_ninety_percent_of_capacity() {
    let now = Utc::now();
    let entries: Vec<KnowledgeEntry> = (0..6000)
        .map(|i| {
            let mut entry = KnowledgeEntry::new(
                format!("reading{i} channel{i}"),
                KnowledgeSource::System,
                KnowledgeCategory::Technical,
                EntryContext::new(),
            )
            .with_confidence(80)
            .with_timestamp(now);
            entry.utility_score = (i % 200) as u8;
            entry
        })
        .collect();

    let settings = StoreSettings {
        max_entries: 5000,
        ..StoreSettings::default()
    };
    let mut store = KnowledgeStore::open(Box::new(MemoryRecordStore::with_entries(entries)), settings).unwrap();
    assert_eq!(store.len(), 6000);

    let report = store.evict_if_over_capacity(now).unwrap();
    assert_eq!(store.len(), 4500);
    assert_eq!(report.evicted.len(), 1500);

    let lowest_kept = store.entries().map(|e| e.utility_score).min().unwrap();
    assert_eq!(lowest_kept, 50);
    assert!(store.entries().all(|e| e.utility_score >= 20));
}

#[tokio::test]
async fn test_battery_conflicts_leave_highest_confidence_first() {
    let engine = KnowledgeEngine::in_memory(&Config::default()).unwrap();
    let content = "battery optimization";

    let low = engine
        .ingest(
            content,
            KnowledgeSource::Interaction,
            KnowledgeCategory::Technical,
            EntryContext::new().with_trust_level(25),
        )
        .await
        .unwrap();
    let mid = engine
        .ingest(
            content,
            KnowledgeSource::Interaction,
            KnowledgeCategory::Technical,
            EntryContext::new().with_trust_level(62),
        )
        .await
        .unwrap();
    let high = engine
        .ingest(
            content,
            KnowledgeSource::System,
            KnowledgeCategory::Technical,
            EntryContext::new().with_emotional_label("focused"),
        )
        .await
        .unwrap();

    assert_eq!((low.confidence, mid.confidence, high.confidence), (60, 75, 90));
    assert_eq!(mid.conflicts.len(), 1);
    assert_eq!(high.conflicts.len(), 1);
    assert_eq!(engine.get(&low.id).await.unwrap().validation_status, ValidationStatus::Rejected);
    assert_eq!(engine.get(&mid.id).await.unwrap().validation_status, ValidationStatus::Rejected);

    engine.rebuild_indices().await.unwrap();
    let response = engine.query(&KnowledgeQuery::new(content)).await.unwrap();
    assert_eq!(response.hits[0].entry.id, high.id);
    assert_eq!(response.hits[0].entry.confidence_score, 90);
}

#[tokio::test]
async fn test_truncated_log_tail_does_not_lose_committed_entries() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_data_dir(dir.path());

    let id = {
        let engine = KnowledgeEngine::open(&config).unwrap();
        engine
            .ingest(
                "signal loss near the tunnel",
                KnowledgeSource::Environmental,
                KnowledgeCategory::Environmental,
                EntryContext::new(),
            )
            .await
            .unwrap()
            .id
    };

    let log = DataLayout::new(dir.path()).log_path();
    let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(&[0x40, 0x00, 0x00]).unwrap();
    drop(file);

    let later = {
        let engine = KnowledgeEngine::open(&config).unwrap();
        assert!(engine.get(&id).await.is_some());
        engine
            .ingest(
                "tunnel exit restores the signal",
                KnowledgeSource::Environmental,
                KnowledgeCategory::Environmental,
                EntryContext::new(),
            )
            .await
            .unwrap()
            .id
    };

    let engine = KnowledgeEngine::open(&config).unwrap();
    assert!(engine.get(&id).await.is_some());
    assert!(engine.get(&later).await.is_some());
    assert_eq!(engine.stats().await.store.total, 2);
}

#[tokio::test]
async fn test_damaged_frame_length_does_not_erase_later_entries() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_data_dir(dir.path());

    let ids = {
        let engine = KnowledgeEngine::open(&config).unwrap();
        let mut ids = Vec::new();
        for content in [
            "battery drain overnight",
            "signal loss near the tunnel",
            "crowds disperse when it rains",
        ] {
            let receipt = engine
                .ingest(content, KnowledgeSource::System, KnowledgeCategory::Technical, EntryContext::new())
                .await
                .unwrap();
            ids.push(receipt.id);
        }
        ids
    };

    let log = DataLayout::new(dir.path()).log_path();
    let mut bytes = std::fs::read(&log).unwrap();
    let before = bytes.len();
    bytes[3] ^= 0x10;
    std::fs::write(&log, &bytes).unwrap();

    let engine = KnowledgeEngine::open(&config).unwrap();
    assert!(engine.get(&ids[0]).await.is_none());
    assert!(engine.get(&ids[1]).await.is_some());
    assert!(engine.get(&ids[2]).await.is_some());
    assert_eq!(engine.stats().await.store.corrupt_on_load, 1);
    assert_eq!(std::fs::metadata(&log).unwrap().len(), before as u64);

    let preserved = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("knowledge.log.corrupt-"));
    assert!(preserved);
}
