//! Configuration management for the collector.
//!
//! The collector reads a single JSON file at `~/.ashare-collector/config.json`.
//! A missing file yields the defaults below.
//!
//! # Configuration Priority
//!
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables (ASHARE_* prefix)
//! 3. Explicit config file values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ASHARE_LOG_LEVEL` → observability.log_level
//! - `ASHARE_LOG_FORMAT` → observability.log_format
//! - `ASHARE_DATA_DIR` → storage.data_dir
//! - `ASHARE_OUTPUT_DIR` → export.output_dir
//! - `ASHARE_MAX_WORKERS` → collector.max_workers
//! - `ASHARE_DISABLED_SOURCES` → sources[*].enabled (comma-separated names)
//! - `ASHARE_PROXY` → request.proxy

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ashare-collector"),
        |dirs| dirs.home_dir().join(".ashare-collector"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Data Sources
// ============================================================================

/// A ranked data source toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Source name (eastmoney, eastmoney_f10, sina, tencent, cninfo, cache_mapping)
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lower = higher priority
    pub priority: u8,

    /// Optional per-minute request budget
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
}

impl SourceConfig {
    fn new(name: &str, priority: u8, rate_limit_rpm: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority,
            rate_limit_rpm,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("eastmoney", 1, Some(120)),
        SourceConfig::new("eastmoney_f10", 2, Some(60)),
        SourceConfig::new("sina", 3, Some(60)),
        SourceConfig::new("tencent", 5, Some(120)),
        SourceConfig::new("cninfo", 7, Some(30)),
        SourceConfig::new("cache_mapping", 8, None),
    ]
}

// ============================================================================
// Request Behaviour
// ============================================================================

/// HTTP request pacing, retry and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Lower bound of the randomized delay between requests to one source
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the randomized delay between requests to one source
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retries per source before failing over
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the retry delay after every attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Cap on a single retry delay
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Rotated User-Agent pool; empty means the built-in pool
    #[serde(default)]
    pub user_agents: Vec<String>,

    /// Optional HTTP(S) proxy URL
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            user_agents: Vec::new(),
            proxy: None,
        }
    }
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Collector Behaviour
// ============================================================================

/// Pipeline sizing and source-selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Bounded worker pool size
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Log progress every N completed units
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Write a checkpoint every N completed units
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Sources below this success rate are skipped
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Requests observed before the success-rate rule applies
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Consecutive failures before a source is marked unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Maximum successful sources merged for a single stock
    #[serde(default = "default_max_sources_per_stock")]
    pub max_sources_per_stock: usize,

    /// Stock-list sources merged into the master list
    #[serde(default = "default_list_sources")]
    pub list_sources: usize,

    /// Report periods (YYYY-MM-DD) collected for every stock
    #[serde(default = "default_report_dates")]
    pub report_dates: Vec<String>,

    /// Balance-sheet subjects collected for every stock
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            progress_interval: default_progress_interval(),
            checkpoint_interval: default_checkpoint_interval(),
            min_success_rate: default_min_success_rate(),
            min_samples: default_min_samples(),
            unhealthy_threshold: default_unhealthy_threshold(),
            max_sources_per_stock: default_max_sources_per_stock(),
            list_sources: default_list_sources(),
            report_dates: default_report_dates(),
            subjects: default_subjects(),
        }
    }
}

fn default_max_workers() -> usize {
    5
}

fn default_progress_interval() -> usize {
    100
}

fn default_checkpoint_interval() -> usize {
    50
}

fn default_min_success_rate() -> f64 {
    0.05
}

fn default_min_samples() -> u64 {
    20
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_max_sources_per_stock() -> usize {
    3
}

fn default_list_sources() -> usize {
    2
}

fn default_report_dates() -> Vec<String> {
    vec!["2023-12-31".into(), "2024-12-31".into()]
}

fn default_subjects() -> Vec<String> {
    vec!["INVEST_REALESTATE".into(), "TOTAL_ASSETS".into()]
}

// ============================================================================
// Storage
// ============================================================================

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the SQLite file, checkpoints and backups
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Freshness window for cached stock lists
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Freshness window for cached industry classifications
    #[serde(default = "default_industry_ttl_secs")]
    pub industry_ttl_secs: u64,

    /// Flat-file backups older than this are removed
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
            industry_ttl_secs: default_industry_ttl_secs(),
            backup_retention_days: default_backup_retention_days(),
        }
    }
}

impl StorageConfig {
    /// SQLite database path
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ashare.db")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backup")
    }
}

fn default_data_dir() -> PathBuf {
    config_dir().join("data")
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_industry_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_backup_retention_days() -> u32 {
    7
}

// ============================================================================
// Export
// ============================================================================

/// Spreadsheet export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Workbook file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_file_prefix() -> String {
    "A股数据".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub request: RequestConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig::default(),
            sources: default_sources(),
            request: RequestConfig::default(),
            collector: CollectorConfig::default(),
            storage: StorageConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    ///
    /// An explicit path must exist; the default path may be absent.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("ASHARE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("ASHARE_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(dir) = std::env::var("ASHARE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("ASHARE_OUTPUT_DIR") {
            self.export.output_dir = PathBuf::from(dir);
        }

        if let Ok(workers) = std::env::var("ASHARE_MAX_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.collector.max_workers = n;
            }
        }

        if let Ok(disabled) = std::env::var("ASHARE_DISABLED_SOURCES") {
            self.disable_sources(disabled.split(',').map(str::trim));
        }

        if let Ok(proxy) = std::env::var("ASHARE_PROXY") {
            self.request.proxy = if proxy.is_empty() { None } else { Some(proxy) };
        }
    }

    /// Disable every named source.
    pub fn disable_sources<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if let Some(source) = self.sources.iter_mut().find(|s| s.name == name) {
                source.enabled = false;
            }
        }
    }

    /// Look up a source entry by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Enabled sources sorted by priority.
    pub fn enabled_sources(&self) -> Vec<&SourceConfig> {
        let mut sources: Vec<_> = self.sources.iter().filter(|s| s.enabled).collect();
        sources.sort_by_key(|s| s.priority);
        sources
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.collector.max_workers, 5);
        assert_eq!(config.request.max_retries, 5);
        assert_eq!(config.request.min_delay_ms, 500);
        assert_eq!(config.request.max_delay_ms, 2000);
        assert_eq!(config.sources.len(), 6);
        assert_eq!(config.enabled_sources()[0].name, "eastmoney");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"collector": {"max_workers": 8}, "sources": [{"name": "sina", "priority": 1}]}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.collector.max_workers, 8);
        assert_eq!(config.collector.progress_interval, 100);
        assert_eq!(config.sources.len(), 1);
        assert!(config.sources[0].enabled);
        assert_eq!(config.request.backoff_factor, 2.0);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.disable_sources(["tencent", "cninfo"]);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(!loaded.source("tencent").unwrap().enabled);
        assert!(!loaded.source("cninfo").unwrap().enabled);
        assert!(loaded.source("sina").unwrap().enabled);
        assert_eq!(loaded.enabled_sources().len(), 4);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempdir().unwrap();
        let result = Config::load_with_env(Some(&dir.path().join("absent.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/ashare"),
            ..Default::default()
        };
        assert_eq!(storage.db_path(), PathBuf::from("/tmp/ashare/ashare.db"));
        assert_eq!(storage.checkpoint_dir(), PathBuf::from("/tmp/ashare/checkpoints"));
    }
}
