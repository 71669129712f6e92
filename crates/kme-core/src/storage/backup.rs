//! Timestamped backups of the compacted store

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

const PREFIX: &str = "store-";
const SUFFIX: &str = ".kmc";

/// Outcome of one backup run
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub path: PathBuf,
    pub retained: usize,
    pub pruned: Vec<PathBuf>,
}

fn backup_name(at: DateTime<Utc>, attempt: u32) -> String {
    let stamp = at.format("%Y%m%dT%H%M%S%.3fZ");
    if attempt == 0 {
        format!("{PREFIX}{stamp}{SUFFIX}")
    } else {
        format!("{PREFIX}{stamp}-{attempt}{SUFFIX}")
    }
}

/// Backups in `dir`, oldest first
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX))
        })
        .collect();
    backups.sort();
    Ok(backups)
}

/// Copy `source` into `dir` and keep only the newest `retention` backups
pub fn create_backup(source: &Path, dir: &Path, retention: usize, at: DateTime<Utc>) -> Result<BackupReport> {
    fs::create_dir_all(dir)?;

    let mut attempt = 0;
    let mut target = dir.join(backup_name(at, attempt));
    while target.exists() {
        attempt += 1;
        target = dir.join(backup_name(at, attempt));
    }
    fs::copy(source, &target)?;
    debug!(path = %target.display(), "Copied store backup");

    let backups = list_backups(dir)?;
    let excess = backups.len().saturating_sub(retention.max(1));
    let mut pruned = Vec::with_capacity(excess);
    for old in backups.into_iter().take(excess) {
        fs::remove_file(&old)?;
        pruned.push(old);
    }

    let retained = list_backups(dir)?.len();
    info!(path = %target.display(), retained, pruned = pruned.len(), "Created backup");

    Ok(BackupReport {
        path: target,
        retained,
        pruned,
    })
}
