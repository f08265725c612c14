//! Disk cleanup strategy
//!
//! Three sweeps, each over its own configured roots:
//! - temp roots: delete files older than the retention window
//! - log roots: gzip `*.log` files older than the retention window
//! - backup roots: delete files older than the backup retention window
//!
//! Sweeps walk the filesystem synchronously and run on the blocking pool.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::RecoveryStrategy;
use crate::config::RecoveryConfig;
use crate::domain::FailureEvent;
use crate::error::{MedicError, Result};
use crate::metrics::MetricsProvider;

const NAME: &str = "disk_full";

/// Outcome of one sweep over one or more roots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    pub files: usize,
    pub bytes_freed: u64,
    pub errors: usize,
}

impl SweepResult {
    fn merge(&mut self, other: SweepResult) {
        self.files += other.files;
        self.bytes_freed += other.bytes_freed;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub temp: SweepResult,
    pub logs: SweepResult,
    pub backups: SweepResult,
}

impl CleanupSummary {
    pub fn bytes_freed(&self) -> u64 {
        self.temp.bytes_freed + self.logs.bytes_freed + self.backups.bytes_freed
    }
}

#[derive(Debug, Clone)]
pub struct DiskCleanupPlan {
    pub temp_dirs: Vec<PathBuf>,
    pub log_dirs: Vec<PathBuf>,
    pub backup_dirs: Vec<PathBuf>,
    pub retention: Duration,
    pub backup_retention: Duration,
}

impl DiskCleanupPlan {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            temp_dirs: config.temp_dirs.clone(),
            log_dirs: config.log_dirs.clone(),
            backup_dirs: config.backup_dirs.clone(),
            retention: config.retention(),
            backup_retention: config.backup_retention(),
        }
    }

    /// Run all three sweeps as of `now`
    pub fn run(&self, now: SystemTime) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        for root in &self.temp_dirs {
            summary.temp.merge(purge_older_than(root, self.retention, now));
        }
        for root in &self.log_dirs {
            summary.logs.merge(compress_logs_older_than(root, self.retention, now));
        }
        for root in &self.backup_dirs {
            summary.backups.merge(purge_older_than(root, self.backup_retention, now));
        }
        summary
    }
}

fn is_older_than(path: &Path, max_age: Duration, now: SystemTime) -> io::Result<bool> {
    let modified = path.symlink_metadata()?.modified()?;
    Ok(now.duration_since(modified).unwrap_or_default() > max_age)
}

/// Files (never directories or symlink targets) under `root`
fn files_under(root: &Path, errors: &mut usize) -> Vec<PathBuf> {
    if !root.is_dir() {
        debug!("cleanup root {} does not exist", root.display());
        return Vec::new();
    }
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("skipping unreadable entry: {}", e);
                *errors += 1;
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Delete regular files under `root` last modified more than `max_age` before `now`
pub fn purge_older_than(root: &Path, max_age: Duration, now: SystemTime) -> SweepResult {
    let mut result = SweepResult::default();
    for path in files_under(root, &mut result.errors) {
        match is_older_than(&path, max_age, now) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => {
                result.errors += 1;
                continue;
            }
        }

        let size = path.symlink_metadata().map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed {}", path.display());
                result.files += 1;
                result.bytes_freed += size;
            }
            Err(e) => {
                debug!("could not remove {}: {}", path.display(), e);
                result.errors += 1;
            }
        }
    }
    result
}

/// Gzip `*.log` files under `root` older than `max_age`, replacing the original
pub fn compress_logs_older_than(root: &Path, max_age: Duration, now: SystemTime) -> SweepResult {
    let mut result = SweepResult::default();
    for path in files_under(root, &mut result.errors) {
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        match is_older_than(&path, max_age, now) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => {
                result.errors += 1;
                continue;
            }
        }

        match gzip_in_place(&path) {
            Ok(Some(saved)) => {
                result.files += 1;
                result.bytes_freed += saved;
            }
            Ok(None) => {}
            Err(e) => {
                debug!("could not compress {}: {}", path.display(), e);
                result.errors += 1;
            }
        }
    }
    result
}

/// Returns bytes saved, or `None` when a compressed copy already exists
fn gzip_in_place(path: &Path) -> io::Result<Option<u64>> {
    let target = path.with_extension("log.gz");
    if target.exists() {
        return Ok(None);
    }

    let original = path.metadata()?.len();
    let mut reader = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&target)?), Compression::default());

    let written = io::copy(&mut reader, &mut encoder)
        .and_then(|_| encoder.finish())
        .and_then(|mut writer| io::Write::flush(&mut writer));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&target);
        return Err(e);
    }

    std::fs::remove_file(path)?;
    let compressed = target.metadata()?.len();
    Ok(Some(original.saturating_sub(compressed)))
}

/// Sweep temp, log and backup roots, re-check disk usage
pub struct DiskStrategy {
    metrics: Arc<dyn MetricsProvider>,
    path: PathBuf,
    threshold: f64,
    plan: DiskCleanupPlan,
}

impl DiskStrategy {
    pub fn new(
        metrics: Arc<dyn MetricsProvider>,
        path: PathBuf,
        threshold: f64,
        plan: DiskCleanupPlan,
    ) -> Self {
        Self {
            metrics,
            path,
            threshold,
            plan,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for DiskStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn steps(&self) -> Vec<String> {
        vec![
            "clean temp files".to_string(),
            "compress logs".to_string(),
            "delete expired backups".to_string(),
        ]
    }

    async fn execute(&self, _event: &FailureEvent) -> Result<bool> {
        let plan = self.plan.clone();
        let summary = tokio::task::spawn_blocking(move || plan.run(SystemTime::now()))
            .await
            .map_err(|e| MedicError::strategy(NAME, format!("cleanup task failed: {e}")))?;

        info!(
            "disk cleanup: {} temp files removed, {} logs compressed, {} backups removed, {:.1}MB freed",
            summary.temp.files,
            summary.logs.files,
            summary.backups.files,
            summary.bytes_freed() as f64 / (1024.0 * 1024.0)
        );
        let errors = summary.temp.errors + summary.logs.errors + summary.backups.errors;
        if errors > 0 {
            warn!("disk cleanup skipped {} entries it could not process", errors);
        }

        let disk = self.metrics.disk_usage(&self.path).await?;
        info!("disk usage after cleanup: {:.1}%", disk.percent);
        Ok(disk.percent <= self.threshold)
    }
}
