//! Knowledge engine
//!
//! Orchestrates the store, the indices and the graph under one concurrency
//! model:
//!
//! - **Mutation gate**: the `KnowledgeStore` lives behind a single async
//!   mutex. Ingest, eviction, migration, compaction, backup and query
//!   telemetry all take it, so at most one mutation runs at a time.
//! - **Generations**: indices are immutable once built. Rebuilds snapshot the
//!   live entries under the gate, build off the gate on the blocking pool,
//!   then swap a new `Arc<IndexGeneration>` in. Readers never wait on a
//!   rebuild and never see a partial one.
//! - **Events**: every operation returns its events; when a channel is
//!   attached they are also forwarded to it.
//!
//! Ingest does not touch the indices. Queries against a generation older
//! than the store report `stale` and serve the last good results until the
//! next `rebuild_indices`.

pub mod generation;
pub mod lifecycle;

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, QueryConfig};
use crate::domain::graph::{GraphSettings, RelationshipGraph, SemanticCluster};
use crate::domain::index::{IndexCounts, IndexSettings, LexicalIndex};
use crate::domain::knowledge::{
    ConflictMatch, EntryContext, EvictionReport, IngestReceipt, KnowledgeCategory, KnowledgeEntry, KnowledgeEvent,
    KnowledgeSource, KnowledgeStore, MigrationReport, StoreSettings, StoreStats, ValidationStatus,
};
use crate::domain::query::{CacheStats, KnowledgeQuery, ParsedQuery, QueryCache, QueryHit, candidates, rank};
use crate::error::{Error, Result};
use crate::storage::{
    BackupReport, DataLayout, DiskRecordStore, LegacyReader, MemoryRecordStore, RecordStore, StoreMetadata, backup,
    snapshot,
};

pub use generation::IndexGeneration;
pub use lifecycle::{LifecycleHandle, LifecycleManager, LifecycleReport};

/// Legacy records applied per gate acquisition
pub const MIGRATION_BATCH: usize = 500;

/// Ranked results of one query
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub hits: Vec<QueryHit>,
    /// Generation the candidates came from
    pub generation: u64,
    /// True when the store has changed since that generation was built
    pub stale: bool,
    pub cache_hit: bool,
}

/// Outcome of a keyword/phrase rebuild
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexRebuild {
    pub generation: u64,
    pub store_version: u64,
    pub counts: IndexCounts,
}

/// Outcome of a graph and cluster rebuild
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GraphRebuild {
    pub generation: u64,
    pub store_version: u64,
    pub entries: usize,
    pub edges: usize,
    pub clusters: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub generation: u64,
    pub index_version: u64,
    pub indexed_entries: usize,
    pub graph_version: u64,
    pub graph_edges: usize,
    pub clusters: usize,
    pub stale: bool,
    pub cache: CacheStats,
}

pub struct KnowledgeEngine {
    store: Mutex<KnowledgeStore>,
    current: RwLock<Arc<IndexGeneration>>,
    cache: std::sync::Mutex<QueryCache>,
    index_settings: IndexSettings,
    graph_settings: GraphSettings,
    query_config: QueryConfig,
    backup_retention: usize,
    events: Option<mpsc::Sender<KnowledgeEvent>>,
}

impl std::fmt::Debug for KnowledgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeEngine")
            .field("generation", &self.generation().generation)
            .field("index_settings", &self.index_settings)
            .finish()
    }
}

impl KnowledgeEngine {
    /// Open the on-disk store under `config.store.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        let backend = DiskRecordStore::open(&config.store.data_dir)?;
        Self::with_backend(Box::new(backend), config)
    }

    /// Engine over a store that never touches disk
    pub fn in_memory(config: &Config) -> Result<Self> {
        Self::with_backend(Box::new(MemoryRecordStore::new()), config)
    }

    pub fn with_backend(backend: Box<dyn RecordStore>, config: &Config) -> Result<Self> {
        let store = KnowledgeStore::open(backend, StoreSettings::from(config))?;
        let index_settings = IndexSettings::from(&config.index);
        let lexical = initial_index(&store, &index_settings);

        info!(
            entries = store.len(),
            indexed = lexical.len(),
            store_version = store.version(),
            "Knowledge engine ready"
        );

        Ok(Self {
            current: RwLock::new(Arc::new(IndexGeneration::new(1, lexical))),
            store: Mutex::new(store),
            cache: std::sync::Mutex::new(QueryCache::new(
                config.query.cache_capacity,
                Duration::from_secs(config.query.cache_ttl_secs),
            )),
            index_settings,
            graph_settings: GraphSettings::from(&config.index),
            query_config: config.query.clone(),
            backup_retention: config.lifecycle.backup_retention,
            events: None,
        })
    }

    /// Forward every event to `sender` as well as returning it
    pub fn with_event_sender(mut self, sender: mpsc::Sender<KnowledgeEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// The generation readers currently see
    pub fn generation(&self) -> Arc<IndexGeneration> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    // ========== Ingest ==========

    pub async fn ingest(
        &self,
        content: impl Into<String>,
        source: KnowledgeSource,
        category: KnowledgeCategory,
        context: EntryContext,
    ) -> Result<IngestReceipt> {
        let receipt = {
            let mut store = self.store.lock().await;
            store.ingest(content, source, category, context)?
        };
        self.emit(&receipt.events);
        Ok(receipt)
    }

    /// Strongest conflict `entry` would raise, without storing it
    pub async fn detect_conflict(&self, entry: &KnowledgeEntry) -> Option<ConflictMatch> {
        self.store.lock().await.detect_conflict(entry)
    }

    pub async fn get(&self, id: &Uuid) -> Option<KnowledgeEntry> {
        self.store.lock().await.get(id).cloned()
    }

    pub async fn set_status(&self, id: Uuid, status: ValidationStatus) -> Result<()> {
        self.store.lock().await.set_status(id, status)
    }

    // ========== Query ==========

    /// Ranked retrieval. Returned entries carry the access telemetry this
    /// query applied.
    pub async fn query(&self, request: &KnowledgeQuery) -> Result<QueryResponse> {
        if request.text.trim().is_empty() {
            return Err(Error::InvalidInput("Query text is empty".to_string()));
        }

        let generation = self.generation();
        let parsed = ParsedQuery::parse(
            &request.text,
            self.index_settings.max_keywords,
            self.index_settings.max_phrases,
        );
        if parsed.is_empty() {
            debug!(query = %request.text, "Query has no keywords");
            return Ok(QueryResponse {
                hits: Vec::new(),
                generation: generation.generation,
                stale: false,
                cache_hit: false,
            });
        }

        let (found, cache_hit) = {
            let now = Instant::now();
            let mut cache = self.cache();
            match cache.get(&parsed.normalized, generation.generation, now) {
                Some(found) => (found, true),
                None => {
                    let found = Arc::new(candidates(&generation.lexical, &parsed));
                    cache.insert(parsed.normalized.clone(), generation.generation, Arc::clone(&found), now);
                    (found, false)
                }
            }
        };

        let limit = request
            .max_results
            .unwrap_or(self.query_config.default_max_results);

        let mut store = self.store.lock().await;
        let stale = generation.is_stale(store.version());
        if stale {
            let warning = Error::IndexStale {
                served: generation.lexical_version(),
                current: store.version(),
            };
            warn!(code = warning.code(), "{}", warning);
        }

        let mut hits = rank(&parsed, request, &found, limit, |id| store.get(id));
        let ids: Vec<Uuid> = hits.iter().map(|hit| hit.entry.id).collect();
        let touched = store.record_access(&ids, Utc::now());
        drop(store);

        for (hit, entry) in hits.iter_mut().zip(touched) {
            hit.entry = entry;
        }

        debug!(
            query = %parsed.normalized,
            candidates = found.len(),
            hits = hits.len(),
            cache_hit,
            "Query served"
        );

        Ok(QueryResponse {
            hits,
            generation: generation.generation,
            stale,
            cache_hit,
        })
    }

    // ========== Bulk operations ==========

    /// Migrate a legacy line-delimited file. Records already present by
    /// origin id are skipped, so re-running is harmless.
    pub async fn migrate_from_legacy(&self, path: impl AsRef<Path>) -> Result<MigrationReport> {
        let path = path.as_ref();
        let mut reader = LegacyReader::open(path)?;
        let mut report = MigrationReport::default();

        loop {
            let batch: Vec<_> = reader.by_ref().take(MIGRATION_BATCH).collect();
            if batch.is_empty() {
                break;
            }
            let outcome = {
                let mut store = self.store.lock().await;
                store.migrate(batch)?
            };
            let migrated = outcome.migrated;
            self.emit(&outcome.events);
            report.absorb(outcome);
            if migrated > 0 {
                self.rebuild_indices().await?;
            }
        }
        if !report.pending_links.is_empty() {
            self.store.lock().await.link_migrated(&mut report)?;
        }

        let event = KnowledgeEvent::MigrationCompleted {
            source: path.to_path_buf(),
            migrated: report.migrated,
            skipped_duplicates: report.skipped_duplicates,
            malformed: report.malformed,
            timestamp: Utc::now(),
        };
        self.emit(std::slice::from_ref(&event));
        report.events.push(event);

        info!(
            source = %path.display(),
            migrated = report.migrated,
            skipped_duplicates = report.skipped_duplicates,
            malformed = report.malformed,
            "Legacy migration finished"
        );
        Ok(report)
    }

    /// Trim to 90% of capacity when over it, then refresh the indices
    pub async fn evict_if_over_capacity(&self) -> Result<EvictionReport> {
        let report = {
            let mut store = self.store.lock().await;
            store.evict_if_over_capacity(Utc::now())?
        };
        if report.evicted.is_empty() {
            return Ok(report);
        }

        self.emit(&report.events);
        self.rebuild_indices().await?;
        if !self.generation().graph.is_empty() {
            self.rebuild_graph().await?;
        }
        Ok(report)
    }

    // ========== Rebuilds ==========

    /// Rebuild the keyword and phrase indices and publish a new generation
    pub async fn rebuild_indices(&self) -> Result<IndexRebuild> {
        let (entries, store_version, layout) = self.snapshot_live().await;
        let settings = self.index_settings;

        let index = tokio::task::spawn_blocking(move || LexicalIndex::build(&entries, &settings, store_version))
            .await
            .map_err(|e| Error::Other(format!("Index build task failed: {}", e)))?;

        if let Some(layout) = layout {
            if let Err(e) = snapshot::write_index(&layout.index_snapshot_path(), &index) {
                warn!(error = %e, "Failed to write index snapshot");
            }
        }

        let counts = index.counts;
        let published = self.publish(|current, next| {
            (index.store_version >= current.lexical_version()).then(|| current.with_lexical(next, index))
        });

        info!(
            generation = published.generation,
            entries = counts.entries,
            keywords = counts.keywords,
            phrases = counts.phrases,
            "Rebuilt lexical index"
        );
        self.emit(&[KnowledgeEvent::IndexRebuilt {
            generation: published.generation,
            entries: counts.entries,
            keywords: counts.keywords,
            phrases: counts.phrases,
            timestamp: Utc::now(),
        }]);

        Ok(IndexRebuild {
            generation: published.generation,
            store_version: published.lexical_version(),
            counts,
        })
    }

    /// Rebuild the relationship graph and clusters; O(n^2) in live entries
    pub async fn rebuild_graph(&self) -> Result<GraphRebuild> {
        let (entries, store_version, _) = self.snapshot_live().await;
        let settings = self.graph_settings;

        let (graph, clusters) = tokio::task::spawn_blocking(move || {
            let graph = RelationshipGraph::build(&entries, &settings, store_version);
            let clusters = graph.clusters(&settings);
            (graph, clusters)
        })
        .await
        .map_err(|e| Error::Other(format!("Graph build task failed: {}", e)))?;

        let entries = graph.len();
        let edges = graph.edge_count();
        let cluster_count = clusters.len();
        let published = self.publish(|current, next| {
            (graph.store_version >= current.graph_version()).then(|| current.with_graph(next, graph, clusters))
        });

        info!(
            generation = published.generation,
            entries,
            edges,
            clusters = cluster_count,
            "Rebuilt relationship graph"
        );
        self.emit(&[KnowledgeEvent::GraphRebuilt {
            generation: published.generation,
            edges,
            clusters: cluster_count,
            timestamp: Utc::now(),
        }]);

        Ok(GraphRebuild {
            generation: published.generation,
            store_version: published.graph_version(),
            entries,
            edges,
            clusters: cluster_count,
        })
    }

    /// Clusters of the current generation
    pub fn clusters(&self) -> Arc<Vec<SemanticCluster>> {
        Arc::clone(&self.generation().clusters)
    }

    /// Graph neighbours of `id` in the current generation, strongest first
    pub fn neighbors(&self, id: &Uuid) -> Vec<(Uuid, f64)> {
        self.generation().graph.neighbors_of(id)
    }

    // ========== Persistence ==========

    /// Persist pending access telemetry
    pub async fn flush(&self) -> Result<usize> {
        self.store.lock().await.flush()
    }

    /// Fold the log into the compacted file and refresh the metadata file
    pub async fn compact(&self) -> Result<usize> {
        let entries = {
            let mut store = self.store.lock().await;
            let entries = store.compact()?;
            if let Some(layout) = store.layout() {
                snapshot::write_metadata(&layout.metadata_path(), &StoreMetadata::current(entries))?;
            }
            entries
        };
        self.emit(&[KnowledgeEvent::StoreCompacted {
            entries,
            timestamp: Utc::now(),
        }]);
        Ok(entries)
    }

    /// Compact, then copy the compacted file into the backup directory.
    /// Returns None for stores without a data directory.
    pub async fn backup(&self) -> Result<Option<BackupReport>> {
        let report = {
            let mut store = self.store.lock().await;
            let Some(layout) = store.layout().cloned() else {
                debug!("Skipping backup of in-memory store");
                return Ok(None);
            };
            store.compact()?;
            backup::create_backup(
                &layout.compacted_path(),
                &layout.backup_dir(),
                self.backup_retention,
                Utc::now(),
            )?
        };

        self.emit(&[KnowledgeEvent::BackupCreated {
            path: report.path.clone(),
            retained: report.retained,
            timestamp: Utc::now(),
        }]);
        Ok(Some(report))
    }

    pub async fn stats(&self) -> EngineStats {
        let store = self.store.lock().await.stats();
        let generation = self.generation();
        EngineStats {
            stale: generation.is_stale(store.version),
            store,
            generation: generation.generation,
            index_version: generation.lexical_version(),
            indexed_entries: generation.lexical.len(),
            graph_version: generation.graph_version(),
            graph_edges: generation.graph.edge_count(),
            clusters: generation.clusters.len(),
            cache: self.cache().stats(),
        }
    }

    /// Store version and the lexical index's version, for staleness checks
    pub async fn versions(&self) -> (u64, u64) {
        let store_version = self.store.lock().await.version();
        (store_version, self.generation().lexical_version())
    }

    // ========== Internals ==========

    async fn snapshot_live(&self) -> (Vec<KnowledgeEntry>, u64, Option<DataLayout>) {
        let store = self.store.lock().await;
        (
            store.live_entries().cloned().collect(),
            store.version(),
            store.layout().cloned(),
        )
    }

    /// Swap in the generation `build` derives from the current one. `build`
    /// returns None when a newer build has already landed.
    fn publish(
        &self,
        build: impl FnOnce(&IndexGeneration, u64) -> Option<IndexGeneration>,
    ) -> Arc<IndexGeneration> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let Some(next) = build(&current, current.generation + 1) else {
            debug!(generation = current.generation, "Discarding superseded rebuild");
            return Arc::clone(&current);
        };
        let next = Arc::new(next);
        *current = Arc::clone(&next);
        drop(current);

        self.cache().clear();
        next
    }

    fn cache(&self) -> MutexGuard<'_, QueryCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: &[KnowledgeEvent]) {
        let Some(sender) = &self.events else {
            return;
        };
        for event in events {
            if let Err(e) = sender.try_send(event.clone()) {
                warn!(event_type = event.event_type_name(), error = %e, "Dropped knowledge event");
            }
        }
    }
}

/// Reuse the on-disk snapshot when it covers exactly the live entries,
/// otherwise build from scratch
fn initial_index(store: &KnowledgeStore, settings: &IndexSettings) -> LexicalIndex {
    let layout = store.layout();

    if let Some(layout) = layout {
        if let Some(mut index) = snapshot::read_index(&layout.index_snapshot_path()) {
            let ids: Vec<Uuid> = store.live_entries().map(|e| e.id).collect();
            if index.matches_ids(&ids) {
                index.store_version = store.version();
                debug!(entries = index.len(), "Loaded index snapshot");
                return index;
            }
            debug!("Index snapshot out of date, rebuilding");
        }
    }

    let index = LexicalIndex::build(store.live_entries(), settings, store.version());
    if let Some(layout) = layout {
        if let Err(e) = snapshot::write_index(&layout.index_snapshot_path(), &index) {
            warn!(error = %e, "Failed to write index snapshot");
        }
    }
    index
}
