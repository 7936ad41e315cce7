//! Local collector storage using SQLite.
//!
//! Provides persistent storage for:
//! - The listed-company list
//! - Industry classifications
//! - Balance-sheet metrics (one row per code × period × subject)
//! - Sync metadata and the stock-list version log
//!
//! Upserts never replace a stored non-null value with NULL, so repeated and
//! resumed runs only accumulate data.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, DatabaseName};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::data::{FinancialMetric, IndustryClassification, ListedCompany, Market};
use crate::processing::diff::DiffSummary;
use ashare_common::StorageConfig;

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Listed companies
CREATE TABLE IF NOT EXISTS stocks (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    market TEXT NOT NULL,
    list_date TEXT,
    source TEXT NOT NULL,
    delisted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stocks_market ON stocks(market);

-- Industry classifications
CREATE TABLE IF NOT EXISTS industries (
    code TEXT PRIMARY KEY,
    level1 TEXT,
    level2 TEXT,
    level3 TEXT,
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_industries_level1 ON industries(level1);

-- Balance-sheet metrics, value in yuan
CREATE TABLE IF NOT EXISTS financial_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    period TEXT NOT NULL,
    subject TEXT NOT NULL,
    value REAL,
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(code, period, subject)
);

CREATE INDEX IF NOT EXISTS idx_financial_metrics_code
ON financial_metrics(code, period DESC);

-- Sync metadata
CREATE TABLE IF NOT EXISTS sync_metadata (
    data_type TEXT NOT NULL,
    symbol TEXT NOT NULL DEFAULT '__global__',
    last_sync_at TEXT NOT NULL,
    next_sync_at TEXT,
    sync_status TEXT NOT NULL,
    error_message TEXT,
    PRIMARY KEY(data_type, symbol)
);

-- Stock-list version log
CREATE TABLE IF NOT EXISTS data_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    total INTEGER NOT NULL,
    added INTEGER NOT NULL,
    removed INTEGER NOT NULL,
    renamed INTEGER NOT NULL,
    unchanged INTEGER NOT NULL
);
"#;

const GLOBAL_KEY: &str = "__global__";

/// Sync metadata key of the stock list
pub const SYNC_STOCK_LIST: &str = "stock_list";
/// Sync metadata key of a full collection run
pub const SYNC_RUN: &str = "collection_run";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for local storage
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Path to SQLite database
    pub db_path: PathBuf,
    /// Whether local storage is enabled
    pub enabled: bool,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self::from_storage(&StorageConfig::default())
    }
}

impl LocalStorageConfig {
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self {
            db_path: storage.db_path(),
            enabled: true,
        }
    }
}

// ============================================================================
// Sync Status
// ============================================================================

/// Sync status for data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failed,
    Pending,
    InProgress,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
        }
    }
}

impl SyncStatus {
    fn from_str(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "in_progress" => Self::InProgress,
            _ => Self::Pending,
        }
    }
}

/// Sync metadata record
#[derive(Debug, Clone)]
pub struct SyncMetadata {
    pub data_type: String,
    pub symbol: Option<String>,
    pub last_sync_at: DateTime<Utc>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub error_message: Option<String>,
}

impl SyncMetadata {
    /// Last sync succeeded within `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.sync_status == SyncStatus::Success && age_within(self.last_sync_at, ttl)
    }
}

/// One entry of the stock-list version log
#[derive(Debug, Clone)]
pub struct DataVersion {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub summary: DiffSummary,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_date(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn age_within(at: DateTime<Utc>, ttl: Duration) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => Utc::now() - at <= ttl,
        Err(_) => true,
    }
}

// ============================================================================
// Local Storage
// ============================================================================

/// Local SQLite storage for collected data
pub struct LocalStorage {
    /// rusqlite::Connection is Send but not Sync, hence the Mutex
    db: Arc<Mutex<Connection>>,
    config: LocalStorageConfig,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    pub fn new(config: LocalStorageConfig) -> Result<Self> {
        if !config.enabled {
            return Err(anyhow::anyhow!("Local storage is disabled"));
        }

        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&config.db_path)
            .context("Failed to open local storage database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(db_path = %config.db_path.display(), "Initialized local storage");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Open the database configured in `storage`.
    pub fn open(storage: &StorageConfig) -> Result<Self> {
        Self::new(LocalStorageConfig::from_storage(storage))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    // ========================================================================
    // Stock List Operations
    // ========================================================================

    /// Upsert companies. A stored listing date survives a NULL update.
    pub async fn save_companies(&self, companies: &[ListedCompany]) -> Result<usize> {
        if companies.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO stocks (code, name, market, list_date, source, delisted, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name,
                    market = excluded.market,
                    list_date = COALESCE(excluded.list_date, stocks.list_date),
                    source = excluded.source,
                    delisted = 0,
                    updated_at = excluded.updated_at
                "#,
            )?;
            for company in companies {
                count += stmt.execute(params![
                    company.code,
                    company.name,
                    company.market.key(),
                    company.list_date.map(|d| d.to_string()),
                    company.source,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count, "Saved companies to local storage");
        Ok(count)
    }

    /// All companies still listed, ordered by code.
    pub async fn get_companies(&self) -> Result<Vec<ListedCompany>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT code, name, market, list_date, source FROM stocks
             WHERE delisted = 0 ORDER BY code",
        )?;
        let companies = stmt
            .query_map([], Self::row_to_company)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(companies)
    }

    pub async fn get_company(&self, code: &str) -> Result<Option<ListedCompany>> {
        let db = self.db.lock().await;
        let result = db.query_row(
            "SELECT code, name, market, list_date, source FROM stocks WHERE code = ?1",
            params![code],
            Self::row_to_company,
        );
        match result {
            Ok(company) => Ok(Some(company)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Listed companies whose code starts with `prefix`, e.g. "688".
    pub async fn search_companies(&self, prefix: &str) -> Result<Vec<ListedCompany>> {
        let pattern = format!("{}%", prefix.replace(['%', '_'], ""));
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT code, name, market, list_date, source FROM stocks
             WHERE delisted = 0 AND code LIKE ?1 ORDER BY code",
        )?;
        let companies = stmt
            .query_map(params![pattern], Self::row_to_company)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(companies)
    }

    /// Flag companies missing from the latest list. Their data is kept.
    pub async fn mark_delisted(&self, codes: &[String]) -> Result<usize> {
        if codes.is_empty() {
            return Ok(0);
        }
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE stocks SET delisted = 1, updated_at = ?2 WHERE code = ?1")?;
            for code in codes {
                count += stmt.execute(params![code, now])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub async fn company_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 =
            db.query_row("SELECT COUNT(*) FROM stocks WHERE delisted = 0", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<ListedCompany> {
        let market: String = row.get(2)?;
        Ok(ListedCompany {
            code: row.get(0)?,
            name: row.get(1)?,
            market: Market::from_key(&market),
            list_date: parse_date(row.get(3)?),
            source: row.get(4)?,
        })
    }

    // ========================================================================
    // Industry Operations
    // ========================================================================

    /// Upsert classifications, keeping stored levels the update leaves NULL.
    ///
    /// An all-empty classification is stored too: it marks the code as
    /// attempted with no source reporting an industry.
    pub async fn save_industries(&self, industries: &[IndustryClassification]) -> Result<usize> {
        if industries.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO industries (code, level1, level2, level3, source, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(code) DO UPDATE SET
                    level1 = COALESCE(excluded.level1, industries.level1),
                    level2 = COALESCE(excluded.level2, industries.level2),
                    level3 = COALESCE(excluded.level3, industries.level3),
                    source = CASE
                        WHEN excluded.level1 IS NULL AND excluded.level2 IS NULL
                             AND excluded.level3 IS NULL THEN industries.source
                        ELSE excluded.source END,
                    updated_at = excluded.updated_at
                "#,
            )?;
            for industry in industries {
                count += stmt.execute(params![
                    industry.code,
                    industry.level1,
                    industry.level2,
                    industry.level3,
                    industry.source,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count, "Saved industries to local storage");
        Ok(count)
    }

    pub async fn get_industries(&self) -> Result<Vec<IndustryClassification>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT code, level1, level2, level3, source FROM industries ORDER BY code",
        )?;
        let industries = stmt
            .query_map([], Self::row_to_industry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(industries)
    }

    /// Stored classification for `code` if it was updated within `max_age`
    /// and carries at least one level.
    pub async fn get_fresh_industry(
        &self,
        code: &str,
        max_age: Duration,
    ) -> Result<Option<IndustryClassification>> {
        let db = self.db.lock().await;
        let result = db.query_row(
            "SELECT code, level1, level2, level3, source, updated_at FROM industries
             WHERE code = ?1",
            params![code],
            |row| {
                let updated_at: String = row.get(5)?;
                Ok((Self::row_to_industry(row)?, parse_timestamp(&updated_at)))
            },
        );
        match result {
            Ok((industry, updated_at)) if !industry.is_empty() && age_within(updated_at, max_age) => {
                Ok(Some(industry))
            }
            Ok(_) => Ok(None),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Codes with a stored classification row, complete or not.
    pub async fn industry_attempted_codes(&self) -> Result<HashSet<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT code FROM industries")?;
        let codes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(codes)
    }

    fn row_to_industry(row: &rusqlite::Row) -> rusqlite::Result<IndustryClassification> {
        Ok(IndustryClassification {
            code: row.get(0)?,
            level1: row.get(1)?,
            level2: row.get(2)?,
            level3: row.get(3)?,
            source: row.get(4)?,
        })
    }

    // ========================================================================
    // Financial Metric Operations
    // ========================================================================

    /// Upsert metrics, keeping a stored value the update leaves NULL.
    pub async fn save_metrics(&self, metrics: &[FinancialMetric]) -> Result<usize> {
        if metrics.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO financial_metrics (code, period, subject, value, source, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(code, period, subject) DO UPDATE SET
                    value = COALESCE(excluded.value, financial_metrics.value),
                    source = CASE WHEN excluded.value IS NULL
                        THEN financial_metrics.source ELSE excluded.source END,
                    updated_at = excluded.updated_at
                "#,
            )?;
            for metric in metrics {
                count += stmt.execute(params![
                    metric.code,
                    metric.period.to_string(),
                    metric.subject,
                    metric.value,
                    metric.source,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count, "Saved financial metrics to local storage");
        Ok(count)
    }

    /// Stored metrics for `code`, ordered by period then subject.
    pub async fn get_metrics(&self, code: &str) -> Result<Vec<FinancialMetric>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT code, period, subject, value, source FROM financial_metrics
             WHERE code = ?1 ORDER BY period, subject",
        )?;
        let metrics = stmt
            .query_map(params![code], Self::row_to_metric)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        Ok(metrics)
    }

    /// Stored metrics for `code` written within `max_age`.
    pub async fn get_fresh_metrics(&self, code: &str, max_age: Duration) -> Result<Vec<FinancialMetric>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT code, period, subject, value, source, updated_at FROM financial_metrics
             WHERE code = ?1 ORDER BY period, subject",
        )?;
        let rows = stmt
            .query_map(params![code], |row| {
                let updated_at: String = row.get(5)?;
                Ok((Self::row_to_metric(row)?, parse_timestamp(&updated_at)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter(|(_, updated_at)| age_within(*updated_at, max_age))
            .filter_map(|(metric, _)| metric)
            .collect())
    }

    pub async fn get_all_metrics(&self) -> Result<Vec<FinancialMetric>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT code, period, subject, value, source FROM financial_metrics
             ORDER BY code, period, subject",
        )?;
        let metrics = stmt
            .query_map([], Self::row_to_metric)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        Ok(metrics)
    }

    /// Codes with a stored row for every requested period × subject cell.
    pub async fn metric_attempted_codes(
        &self,
        periods: &[NaiveDate],
        subjects: &[String],
    ) -> Result<HashSet<String>> {
        let wanted: HashSet<(String, &str)> = periods
            .iter()
            .flat_map(|p| subjects.iter().map(move |s| (p.to_string(), s.as_str())))
            .collect();
        if wanted.is_empty() {
            return Ok(HashSet::new());
        }

        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT code, period, subject FROM financial_metrics")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut filled: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let (code, period, subject) = row?;
            if wanted.contains(&(period, subject.as_str())) {
                *filled.entry(code).or_default() += 1;
            }
        }

        Ok(filled
            .into_iter()
            .filter(|(_, n)| *n >= wanted.len())
            .map(|(code, _)| code)
            .collect())
    }

    /// Rows with an unparseable period are skipped.
    fn row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<Option<FinancialMetric>> {
        let Some(period) = parse_date(row.get(1)?) else {
            return Ok(None);
        };
        Ok(Some(FinancialMetric {
            code: row.get(0)?,
            period,
            subject: row.get(2)?,
            value: row.get(3)?,
            source: row.get(4)?,
        }))
    }

    // ========================================================================
    // Sync Metadata Operations
    // ========================================================================

    pub async fn get_sync_metadata(
        &self,
        data_type: &str,
        symbol: Option<&str>,
    ) -> Result<Option<SyncMetadata>> {
        let db = self.db.lock().await;
        let symbol_key = symbol.unwrap_or(GLOBAL_KEY);

        let result = db.query_row(
            "SELECT data_type, symbol, last_sync_at, next_sync_at, sync_status, error_message
             FROM sync_metadata WHERE data_type = ?1 AND symbol = ?2",
            params![data_type, symbol_key],
            Self::row_to_sync_metadata,
        );

        match result {
            Ok(meta) => Ok(Some(meta)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_sync_metadata(&self) -> Result<Vec<SyncMetadata>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT data_type, symbol, last_sync_at, next_sync_at, sync_status, error_message
             FROM sync_metadata ORDER BY data_type, symbol",
        )?;
        let entries = stmt
            .query_map([], Self::row_to_sync_metadata)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub async fn update_sync_metadata(
        &self,
        data_type: &str,
        symbol: Option<&str>,
        status: SyncStatus,
        next_sync_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let symbol_key = symbol.unwrap_or(GLOBAL_KEY);

        db.execute(
            r#"
            INSERT OR REPLACE INTO sync_metadata
            (data_type, symbol, last_sync_at, next_sync_at, sync_status, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                data_type,
                symbol_key,
                Utc::now().to_rfc3339(),
                next_sync_at.map(|t| t.to_rfc3339()),
                status.to_string(),
                error_message,
            ],
        )?;

        Ok(())
    }

    fn row_to_sync_metadata(row: &rusqlite::Row) -> rusqlite::Result<SyncMetadata> {
        let symbol: String = row.get(1)?;
        let last_sync: String = row.get(2)?;
        let next_sync: Option<String> = row.get(3)?;
        let status: String = row.get(4)?;

        Ok(SyncMetadata {
            data_type: row.get(0)?,
            symbol: (symbol != GLOBAL_KEY).then_some(symbol),
            last_sync_at: parse_timestamp(&last_sync),
            next_sync_at: next_sync.map(|s| parse_timestamp(&s)),
            sync_status: SyncStatus::from_str(&status),
            error_message: row.get(5)?,
        })
    }

    // ========================================================================
    // Version Log
    // ========================================================================

    pub async fn record_version(&self, summary: &DiffSummary) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO data_versions (created_at, total, added, removed, renamed, unchanged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Utc::now().to_rfc3339(),
                summary.total as i64,
                summary.added as i64,
                summary.removed as i64,
                summary.renamed as i64,
                summary.unchanged as i64,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Most recent versions first.
    pub async fn recent_versions(&self, limit: usize) -> Result<Vec<DataVersion>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, created_at, total, added, removed, renamed, unchanged
             FROM data_versions ORDER BY id DESC LIMIT ?1",
        )?;
        let versions = stmt
            .query_map(params![limit as i64], |row| {
                let created_at: String = row.get(1)?;
                Ok(DataVersion {
                    id: row.get(0)?,
                    created_at: parse_timestamp(&created_at),
                    summary: DiffSummary {
                        total: row.get::<_, i64>(2)? as usize,
                        added: row.get::<_, i64>(3)? as usize,
                        removed: row.get::<_, i64>(4)? as usize,
                        renamed: row.get::<_, i64>(5)? as usize,
                        unchanged: row.get::<_, i64>(6)? as usize,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    // ========================================================================
    // Maintenance Operations
    // ========================================================================

    /// Get database statistics
    pub async fn get_stats(&self) -> Result<LocalStorageStats> {
        let db = self.db.lock().await;

        let count = |sql: &str| -> Result<u64> {
            let n: i64 = db.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        let stats = LocalStorageStats {
            company_count: count("SELECT COUNT(*) FROM stocks WHERE delisted = 0")?,
            delisted_count: count("SELECT COUNT(*) FROM stocks WHERE delisted = 1")?,
            industry_count: count("SELECT COUNT(*) FROM industries")?,
            complete_industry_count: count(
                "SELECT COUNT(*) FROM industries WHERE level1 IS NOT NULL AND level2 IS NOT NULL",
            )?,
            metric_count: count("SELECT COUNT(*) FROM financial_metrics")?,
            filled_metric_count: count(
                "SELECT COUNT(*) FROM financial_metrics WHERE value IS NOT NULL",
            )?,
            version_count: count("SELECT COUNT(*) FROM data_versions")?,
            db_size_bytes: std::fs::metadata(&self.config.db_path)
                .map(|m| m.len())
                .unwrap_or(0),
        };
        Ok(stats)
    }

    /// Vacuum the database to reclaim space
    pub async fn vacuum(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch("VACUUM")?;
        info!("Vacuumed local storage database");
        Ok(())
    }

    /// Online copy of the whole database into `dest`.
    pub async fn backup_to(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = self.db.lock().await;
        db.backup(DatabaseName::Main, dest, None)
            .with_context(|| format!("Failed to back up database to {}", dest.display()))?;
        info!(dest = %dest.display(), "Backed up local storage database");
        Ok(())
    }
}

/// Statistics about local storage
#[derive(Debug, Clone, Default)]
pub struct LocalStorageStats {
    pub company_count: u64,
    pub delisted_count: u64,
    pub industry_count: u64,
    pub complete_industry_count: u64,
    pub metric_count: u64,
    pub filled_metric_count: u64,
    pub version_count: u64,
    pub db_size_bytes: u64,
}

impl std::fmt::Display for LocalStorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LocalStorage: {} companies ({} delisted), {}/{} industries complete, {}/{} metrics filled, {} versions ({:.2} MB)",
            self.company_count,
            self.delisted_count,
            self.complete_industry_count,
            self.industry_count,
            self.filled_metric_count,
            self.metric_count,
            self.version_count,
            self.db_size_bytes as f64 / 1_048_576.0
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
