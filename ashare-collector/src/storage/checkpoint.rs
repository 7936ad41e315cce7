//! Pipeline checkpoints.
//!
//! One JSON file per snapshot, named `checkpoint_{stage}_{yyyymmdd_HHMMSS}.json`.
//! The newest file of a stage wins.

use ashare_common::{Result, ResultExt};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

/// Checkpoint status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl CheckpointProgress {
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    pub progress: CheckpointProgress,
    pub status: CheckpointStatus,
    /// Last code processed, when units are codes
    #[serde(default)]
    pub last_code: Option<String>,
}

impl Checkpoint {
    pub fn new(stage: impl Into<String>, progress: CheckpointProgress, status: CheckpointStatus) -> Self {
        Self {
            stage: stage.into(),
            timestamp: Utc::now(),
            progress,
            status,
            last_code: None,
        }
    }

    pub fn with_last_code(mut self, code: Option<String>) -> Self {
        self.last_code = code;
        self
    }
}

/// Split a checkpoint file name into (stage, stamp).
fn parse_file_name(name: &str) -> Option<(&str, NaiveDateTime)> {
    let body = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    if body.len() <= STAMP_LEN + 1 || !body.is_char_boundary(body.len() - STAMP_LEN) {
        return None;
    }
    let (stage, stamp) = body.split_at(body.len() - STAMP_LEN);
    let stage = stage.strip_suffix('_')?;
    let stamp = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some((stage, stamp))
}

/// Reads and writes checkpoint files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a checkpoint and return its path.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .context(format!("Failed to create checkpoint dir {}", self.dir.display()))?;

        let stamp = checkpoint.timestamp.with_timezone(&Local).format(STAMP_FORMAT);
        let path = self
            .dir
            .join(format!("{}{}_{}{}", FILE_PREFIX, checkpoint.stage, stamp, FILE_SUFFIX));

        let content = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&path, content).context(format!("Failed to write checkpoint {}", path.display()))?;

        debug!(
            stage = %checkpoint.stage,
            completed = checkpoint.progress.completed,
            failed = checkpoint.progress.failed,
            total = checkpoint.progress.total,
            "Saved checkpoint"
        );
        Ok(path)
    }

    /// Checkpoint files, optionally of one stage, oldest first.
    pub fn list(&self, stage: Option<&str>) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((file_stage, stamp)) = parse_file_name(name) else {
                continue;
            };
            if stage.is_some_and(|s| s != file_stage) {
                continue;
            }
            files.push((stamp, path));
        }

        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Newest readable checkpoint, optionally of one stage.
    pub fn latest(&self, stage: Option<&str>) -> Result<Option<Checkpoint>> {
        for path in self.list(stage)?.iter().rev() {
            match Self::load(path) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(None)
    }

    pub fn load(path: &Path) -> Result<Checkpoint> {
        let content = fs::read_to_string(path).context(format!("Failed to read checkpoint {}", path.display()))?;
        serde_json::from_str(&content).context(format!("Failed to parse checkpoint {}", path.display()))
    }

    /// Delete checkpoints, optionally of one stage. Returns the count removed.
    pub fn clear(&self, stage: Option<&str>) -> Result<usize> {
        let files = self.list(stage)?;
        for path in &files {
            fs::remove_file(path).context(format!("Failed to remove checkpoint {}", path.display()))?;
        }
        info!(removed = files.len(), stage = stage.unwrap_or("all"), "Cleared checkpoints");
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn checkpoint_at(stage: &str, secs: i64, completed: usize) -> Checkpoint {
        let mut checkpoint = Checkpoint::new(
            stage,
            CheckpointProgress {
                completed,
                failed: 1,
                total: 100,
            },
            CheckpointStatus::Running,
        );
        checkpoint.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        checkpoint
    }

    #[test]
    fn test_parse_file_name() {
        let (stage, stamp) = parse_file_name("checkpoint_industries_20240102_030405.json").unwrap();
        assert_eq!(stage, "industries");
        assert_eq!(stamp.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-02 03:04:05");

        let (stage, _) = parse_file_name("checkpoint_stock_list_20240102_030405.json").unwrap();
        assert_eq!(stage, "stock_list");

        assert!(parse_file_name("checkpoint_20240102_030405.json").is_none());
        assert!(parse_file_name("notes.json").is_none());
        assert!(parse_file_name("checkpoint_industries_latest.json").is_none());
    }

    #[test]
    fn test_save_and_latest() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("checkpoints"));
        assert!(manager.latest(None).unwrap().is_none());

        manager.save(&checkpoint_at("industries", 0, 10)).unwrap();
        manager.save(&checkpoint_at("industries", 60, 20)).unwrap();
        manager.save(&checkpoint_at("financials", 30, 5)).unwrap();

        let latest = manager.latest(Some("industries")).unwrap().unwrap();
        assert_eq!(latest.progress.completed, 20);
        assert_eq!(latest.progress.processed(), 21);

        let overall = manager.latest(None).unwrap().unwrap();
        assert_eq!(overall.stage, "industries");
        assert_eq!(manager.list(Some("financials")).unwrap().len(), 1);
    }

    #[test]
    fn test_latest_skips_corrupt_file() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.save(&checkpoint_at("financials", 0, 7)).unwrap();
        fs::write(dir.path().join("checkpoint_financials_29991231_235959.json"), "{").unwrap();

        let latest = manager.latest(Some("financials")).unwrap().unwrap();
        assert_eq!(latest.progress.completed, 7);
    }

    #[test]
    fn test_load_errors_carry_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("checkpoint_industry_20240101_000000.json");
        let err = CheckpointManager::load(&missing).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read checkpoint"));

        fs::write(&missing, "{").unwrap();
        match CheckpointManager::load(&missing).unwrap_err() {
            ashare_common::Error::WithContext { source, .. } => {
                assert!(matches!(*source, ashare_common::Error::Json(_)))
            }
            other => panic!("expected a parse error with context, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_by_stage() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.save(&checkpoint_at("industries", 0, 1)).unwrap();
        manager.save(&checkpoint_at("financials", 1, 1)).unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        assert_eq!(manager.clear(Some("industries")).unwrap(), 1);
        assert_eq!(manager.list(None).unwrap().len(), 1);
        assert_eq!(manager.clear(None).unwrap(), 1);
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
