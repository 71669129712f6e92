//! Background maintenance
//!
//! Three independent periodic jobs share one engine:
//!
//! | job        | does                                         |
//! |------------|----------------------------------------------|
//! | compaction | flush telemetry, evict over capacity, compact |
//! | reindex    | rebuild the lexical index when it is stale   |
//! | backup     | compact and copy into the backup directory   |
//!
//! Each step takes the engine's mutation gate, so maintenance never overlaps
//! an ingest or eviction. An interval of zero disables that job.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{IndexRebuild, KnowledgeEngine};
use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::storage::BackupReport;

/// Outcome of one full maintenance pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleReport {
    pub flushed: usize,
    pub evicted: usize,
    pub compacted: usize,
    pub reindexed: Option<IndexRebuild>,
    pub backup: Option<BackupReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Compaction,
    Reindex,
    Backup,
}

impl Job {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Compaction => "compaction",
            Self::Reindex => "reindex",
            Self::Backup => "backup",
        }
    }
}

pub struct LifecycleManager {
    engine: Arc<KnowledgeEngine>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(engine: Arc<KnowledgeEngine>, config: LifecycleConfig) -> Self {
        Self { engine, config }
    }

    /// flush -> evict -> compact -> reindex -> backup, once
    pub async fn run_once(&self) -> Result<LifecycleReport> {
        let flushed = self.engine.flush().await?;
        let evicted = self.engine.evict_if_over_capacity().await?.evicted.len();
        let compacted = self.engine.compact().await?;
        let reindexed = reindex_if_stale(&self.engine).await?;
        let backup = self.engine.backup().await?;

        info!(flushed, evicted, compacted, reindexed = reindexed.is_some(), "Maintenance pass complete");
        Ok(LifecycleReport {
            flushed,
            evicted,
            compacted,
            reindexed,
            backup,
        })
    }

    /// Start the periodic jobs
    pub fn spawn(self) -> LifecycleHandle {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        for (job, secs) in [
            (Job::Compaction, self.config.compaction_interval_secs),
            (Job::Reindex, self.config.reindex_interval_secs),
            (Job::Backup, self.config.backup_interval_secs),
        ] {
            if secs == 0 {
                debug!(job = job.as_str(), "Lifecycle job disabled");
                continue;
            }
            let engine = Arc::clone(&self.engine);
            let stop = shutdown.subscribe();
            tasks.push(tokio::spawn(run_job(engine, job, Duration::from_secs(secs), stop)));
        }

        info!(jobs = tasks.len(), "Lifecycle manager started");
        LifecycleHandle { shutdown, tasks }
    }
}

/// Stops the periodic jobs
pub struct LifecycleHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LifecycleHandle {
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every job and wait for in-flight work to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Lifecycle job ended abnormally");
            }
        }
        info!("Lifecycle manager stopped");
    }
}

async fn run_job(engine: Arc<KnowledgeEngine>, job: Job, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        let outcome = match job {
            Job::Compaction => compaction_step(&engine).await,
            Job::Reindex => reindex_if_stale(&engine).await.map(|_| ()),
            Job::Backup => engine.backup().await.map(|_| ()),
        };
        if let Err(e) = outcome {
            warn!(job = job.as_str(), code = e.code(), error = %e, "Lifecycle job failed");
        }
    }
}

async fn compaction_step(engine: &KnowledgeEngine) -> Result<()> {
    engine.flush().await?;
    engine.evict_if_over_capacity().await?;
    engine.compact().await?;
    Ok(())
}

async fn reindex_if_stale(engine: &KnowledgeEngine) -> Result<Option<IndexRebuild>> {
    let (store_version, index_version) = engine.versions().await;
    if index_version >= store_version {
        return Ok(None);
    }
    engine.rebuild_indices().await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::knowledge::{EntryContext, KnowledgeCategory, KnowledgeSource};
    use crate::domain::query::KnowledgeQuery;

    async fn engine_with_entry() -> Arc<KnowledgeEngine> {
        let engine = Arc::new(KnowledgeEngine::in_memory(&Config::default()).unwrap());
        engine
            .ingest(
                "battery drain overnight",
                KnowledgeSource::System,
                KnowledgeCategory::Technical,
                EntryContext::new(),
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_run_once_reindexes_stale_store() {
        let engine = engine_with_entry().await;
        let manager = LifecycleManager::new(Arc::clone(&engine), LifecycleConfig::default());

        let report = manager.run_once().await.unwrap();
        assert_eq!(report.compacted, 1);
        assert!(report.reindexed.is_some());
        assert!(report.backup.is_none());

        let again = manager.run_once().await.unwrap();
        assert!(again.reindexed.is_none());

        let response = engine.query(&KnowledgeQuery::new("battery")).await.unwrap();
        assert_eq!(response.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_disables_job() {
        let engine = engine_with_entry().await;
        let config = LifecycleConfig {
            compaction_interval_secs: 0,
            reindex_interval_secs: 60,
            backup_interval_secs: 0,
            backup_retention: 10,
        };
        let handle = LifecycleManager::new(engine, config).spawn();
        assert_eq!(handle.job_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reindex() {
        let engine = engine_with_entry().await;
        let config = LifecycleConfig {
            compaction_interval_secs: 0,
            reindex_interval_secs: 5,
            backup_interval_secs: 0,
            backup_retention: 10,
        };
        let handle = LifecycleManager::new(Arc::clone(&engine), config).spawn();

        let (store_version, index_version) = engine.versions().await;
        assert!(index_version < store_version);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let (store_version, index_version) = engine.versions().await;
            if index_version == store_version {
                break;
            }
        }
        let (store_version, index_version) = engine.versions().await;
        assert_eq!(index_version, store_version);

        handle.shutdown().await;
    }
}
