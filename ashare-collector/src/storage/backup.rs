//! Flat-file backups and store metadata.
//!
//! A backup is a `backup/{yyyymmdd_HHMMSS}` directory holding every dataset
//! as CSV and pretty JSON plus an online copy of the SQLite database.
//! `store_metadata.json` in the data directory records when each dataset was
//! last written and how many records it held.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::local_storage::LocalStorage;
use ashare_common::{Result, ResultExt, StorageConfig};

pub const SCHEMA_VERSION: u32 = 1;
const METADATA_FILE: &str = "store_metadata.json";

pub const STORE_STOCKS: &str = "stocks";
pub const STORE_INDUSTRIES: &str = "industries";
pub const STORE_METRICS: &str = "financial_metrics";

// ============================================================================
// Dataset Files
// ============================================================================

/// Write `records` as CSV with a header row taken from the field names.
pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context(format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let content = serde_json::to_string_pretty(records)?;
    fs::write(path, content).context(format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Pick `base/stamp`, or `base/stamp_1`, `base/stamp_2`... when taken.
fn unique_dir(base: &Path, stamp: &str) -> PathBuf {
    let mut target = base.join(stamp);
    let mut suffix = 0;
    while target.exists() {
        suffix += 1;
        target = base.join(format!("{}_{}", stamp, suffix));
    }
    target
}

// ============================================================================
// Store Metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub updated_at: DateTime<Utc>,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stores: BTreeMap<String, StoreEntry>,
}

impl Default for StoreMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
            stores: BTreeMap::new(),
        }
    }
}

impl StoreMetadata {
    /// Load from `path`; a missing or unreadable file yields fresh metadata.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse store metadata");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).context(format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn update_store(&mut self, key: &str, record_count: usize) {
        let now = Utc::now();
        self.updated_at = now;
        self.stores.insert(
            key.to_string(),
            StoreEntry {
                updated_at: now,
                record_count,
            },
        );
    }

    /// The store was written within `ttl` under the current schema.
    pub fn is_store_fresh(&self, key: &str, ttl: Duration) -> bool {
        if self.schema_version != SCHEMA_VERSION {
            return false;
        }
        let Some(entry) = self.stores.get(key) else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() - entry.updated_at <= ttl,
            Err(_) => true,
        }
    }
}

// ============================================================================
// Backup Manager
// ============================================================================

/// Files written by one backup run
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub dir: PathBuf,
    pub companies: usize,
    pub industries: usize,
    pub metrics: usize,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    metadata_path: PathBuf,
    retention: Duration,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            metadata_path: metadata_path.into(),
            retention: Duration::from_secs(u64::from(retention_days) * 86_400),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(
            storage.backup_dir(),
            storage.data_dir.join(METADATA_FILE),
            storage.backup_retention_days,
        )
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn metadata(&self) -> StoreMetadata {
        StoreMetadata::load(&self.metadata_path)
    }

    /// Record a dataset write in `store_metadata.json`.
    pub fn record_store(&self, key: &str, record_count: usize) -> Result<()> {
        let mut metadata = self.metadata();
        metadata.update_store(key, record_count);
        metadata.save(&self.metadata_path)
    }

    /// Dump every dataset plus a database copy into a new timestamped directory.
    pub async fn backup_storage(&self, storage: &LocalStorage) -> anyhow::Result<BackupReport> {
        fs::create_dir_all(&self.backup_dir)
            .context(format!("Failed to create {}", self.backup_dir.display()))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = unique_dir(&self.backup_dir, &stamp);
        fs::create_dir_all(&dir)?;

        let companies = storage.get_companies().await?;
        let industries = storage.get_industries().await?;
        let metrics = storage.get_all_metrics().await?;

        write_csv(&dir.join("stocks.csv"), &companies)?;
        write_json(&dir.join("stocks.json"), &companies)?;
        write_csv(&dir.join("industries.csv"), &industries)?;
        write_json(&dir.join("industries.json"), &industries)?;
        write_csv(&dir.join("financial_metrics.csv"), &metrics)?;
        write_json(&dir.join("financial_metrics.json"), &metrics)?;
        storage.backup_to(&dir.join("ashare.db")).await?;

        let mut metadata = self.metadata();
        metadata.update_store(STORE_STOCKS, companies.len());
        metadata.update_store(STORE_INDUSTRIES, industries.len());
        metadata.update_store(STORE_METRICS, metrics.len());
        metadata.save(&self.metadata_path)?;

        info!(
            dir = %dir.display(),
            companies = companies.len(),
            industries = industries.len(),
            metrics = metrics.len(),
            "Created backup"
        );

        Ok(BackupReport {
            dir,
            companies: companies.len(),
            industries: industries.len(),
            metrics: metrics.len(),
        })
    }

    /// Remove backup directories older than the retention period.
    pub fn cleanup(&self) -> Result<usize> {
        self.cleanup_older_than(self.retention)
    }

    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        if !self.backup_dir.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Cannot read backup mtime");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                match fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old backup"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up old backups");
        }
        Ok(removed)
    }
}
