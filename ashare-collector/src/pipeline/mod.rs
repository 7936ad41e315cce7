//! Collection pipeline.
//!
//! ```text
//! stock list → clean/validate/dedup → diff/version → persist
//!            → industries ─┐ (worker pool, per remaining code)
//!            → financials ─┘
//!            → quality → export
//! ```
//!
//! Per-code results are stored as soon as they are merged, so an
//! interrupted run keeps everything finished before the interrupt. A resumed
//! run skips codes that already have a stored row and never removes data.

pub mod progress;
pub mod worker_pool;

pub use progress::ProgressTracker;
pub use worker_pool::{cancel_on_ctrl_c, PoolOutcome, WorkerPool};

use anyhow::{bail, Context, Result};
use ashare_common::Config;
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::{
    parse_periods, CacheMappingAdapter, CninfoAdapter, DataProvider, DataProviderRouter, EastmoneyAdapter,
    EastmoneyF10Adapter, IndustryClassification, ListedCompany, ProviderError, RouterConfig, SinaAdapter,
    TencentAdapter,
};
use crate::export::{export_workbook, Dataset, ExportContext};
use crate::processing::cleaner::{clean_name, normalize_code};
use crate::processing::validator::{sanitize_industry, sanitize_metrics, validate_companies};
use crate::processing::{
    assess, dedup_by_code, merge_industry, merge_metrics, merge_stock_lists, DiffSummary, QualityReport,
    StockDiff, ValidationReport,
};
use crate::storage::{
    BackupManager, Checkpoint, CheckpointManager, CheckpointStatus, LocalStorage, SyncStatus, SYNC_RUN,
    SYNC_STOCK_LIST,
};
use crate::storage::backup::{STORE_INDUSTRIES, STORE_METRICS, STORE_STOCKS};

pub const STAGE_INDUSTRY: &str = "industry";
pub const STAGE_FINANCIALS: &str = "financials";

// ============================================================================
// Router Assembly
// ============================================================================

/// Build a router with every enabled source registered.
pub async fn build_router(
    config: &Config,
    storage: Arc<LocalStorage>,
    cancel: CancellationToken,
) -> DataProviderRouter {
    let router = DataProviderRouter::with_config(RouterConfig::from_config(config)).with_cancellation(cancel);

    let providers: Vec<Option<Arc<dyn DataProvider>>> = vec![
        EastmoneyAdapter::from_config(config).map(|p| Arc::new(p) as Arc<dyn DataProvider>),
        EastmoneyF10Adapter::from_config(config).map(|p| Arc::new(p) as Arc<dyn DataProvider>),
        SinaAdapter::from_config(config).map(|p| Arc::new(p) as Arc<dyn DataProvider>),
        TencentAdapter::from_config(config).map(|p| Arc::new(p) as Arc<dyn DataProvider>),
        CninfoAdapter::from_config(config).map(|p| Arc::new(p) as Arc<dyn DataProvider>),
        CacheMappingAdapter::from_config(config, storage).map(|p| Arc::new(p) as Arc<dyn DataProvider>),
    ];
    for provider in providers.into_iter().flatten() {
        router.register(provider).await;
    }

    router
}

// ============================================================================
// Run Options and Summaries
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip codes that already have stored results
    pub resume: bool,
    /// Only process the first N codes of the stock list
    pub limit: Option<usize>,
    /// Override `collector.max_workers`
    pub workers: Option<usize>,
    /// Override `export.output_dir`
    pub output_dir: Option<PathBuf>,
}

/// Per-code counts of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// Codes in scope
    pub total: usize,
    /// Codes skipped because a previous run stored them
    pub resumed: usize,
    /// Stored with at least one value
    pub collected: usize,
    /// Stored empty: no source had data
    pub no_data: usize,
    /// Not stored; retried by the next resumed run
    pub failed: usize,
    /// Never started because the run was cancelled
    pub skipped: usize,
}

impl StageSummary {
    fn not_run(total: usize) -> Self {
        Self {
            total,
            skipped: total,
            ..Default::default()
        }
    }
}

/// Result of the stock-list stage
#[derive(Debug, Clone)]
pub struct StockListOutcome {
    /// Valid, unique, ordered by code
    pub companies: Vec<ListedCompany>,
    pub diff: Option<DiffSummary>,
    pub validation: ValidationReport,
    /// Sources merged into the list
    pub sources: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stocks: usize,
    pub diff: Option<DiffSummary>,
    pub industries: StageSummary,
    pub financials: StageSummary,
    pub validation: ValidationReport,
    pub quality: QualityReport,
    pub export_path: PathBuf,
    pub interrupted: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Collected,
    NoData,
    Failed,
    Cancelled,
}

struct UnitResult {
    code: String,
    outcome: UnitOutcome,
    validation: ValidationReport,
}

/// Keep `outcome` when the store succeeded.
fn stored(result: Result<usize>, code: &str, outcome: UnitOutcome) -> UnitOutcome {
    match result {
        Ok(_) => outcome,
        Err(e) => {
            let error = format!("{:#}", e);
            warn!(code, %error, "Failed to store result");
            UnitOutcome::Failed
        }
    }
}

/// Validation counts shared by the per-source checks of one unit.
#[derive(Default)]
struct UnitValidation(Mutex<ValidationReport>);

impl UnitValidation {
    fn with<R>(&self, f: impl FnOnce(&mut ValidationReport) -> R) -> R {
        let mut report = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut report)
    }

    fn into_report(self) -> ValidationReport {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Collector Pipeline
// ============================================================================

pub struct CollectorPipeline {
    config: Config,
    router: Arc<DataProviderRouter>,
    storage: Arc<LocalStorage>,
    checkpoints: CheckpointManager,
    backups: BackupManager,
    cancel: CancellationToken,
}

impl CollectorPipeline {
    pub fn new(
        config: Config,
        router: Arc<DataProviderRouter>,
        storage: Arc<LocalStorage>,
        cancel: CancellationToken,
    ) -> Self {
        let checkpoints = CheckpointManager::new(config.storage.checkpoint_dir());
        let backups = BackupManager::from_config(&config.storage);
        Self {
            config,
            router,
            storage,
            checkpoints,
            backups,
            cancel,
        }
    }

    /// Open local storage and register every enabled source.
    pub async fn from_config(config: Config, cancel: CancellationToken) -> Result<Self> {
        let storage = Arc::new(LocalStorage::open(&config.storage).context("Failed to open local storage")?);
        let router = build_router(&config, Arc::clone(&storage), cancel.clone()).await;
        Ok(Self::new(config, Arc::new(router), storage, cancel))
    }

    pub fn router(&self) -> &Arc<DataProviderRouter> {
        &self.router
    }

    pub fn storage(&self) -> &Arc<LocalStorage> {
        &self.storage
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn periods(&self) -> Vec<NaiveDate> {
        parse_periods(&self.config.collector.report_dates)
    }

    fn subjects(&self) -> Vec<String> {
        self.config.collector.subjects.clone()
    }

    fn worker_pool(&self, workers: Option<usize>) -> WorkerPool {
        WorkerPool::new(workers.unwrap_or(self.config.collector.max_workers), self.cancel.clone())
    }

    // ========================================================================
    // Full Run
    // ========================================================================

    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        let started = Instant::now();
        info!(resume = options.resume, limit = ?options.limit, "Starting collection run");
        self.storage
            .update_sync_metadata(SYNC_RUN, None, SyncStatus::InProgress, None, None)
            .await?;

        let stock_list = match self.collect_stock_list(options.resume).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{:#}", e);
                self.storage
                    .update_sync_metadata(SYNC_RUN, None, SyncStatus::Failed, None, Some(&message))
                    .await?;
                return Err(e);
            }
        };

        let mut targets = stock_list.companies.clone();
        if let Some(limit) = options.limit {
            targets.truncate(limit);
        }
        let mut validation = stock_list.validation.clone();
        let pool = self.worker_pool(options.workers);

        let (industries, report) = self.collect_industries(&pool, &targets, options.resume).await?;
        validation.absorb(report);

        let financials = if pool.is_cancelled() {
            StageSummary::not_run(targets.len())
        } else {
            let (summary, report) = self.collect_financials(&pool, &targets, options.resume).await?;
            validation.absorb(report);
            summary
        };

        let interrupted = pool.is_cancelled();
        let codes: HashSet<String> = targets.iter().map(|c| c.code.clone()).collect();
        let dataset = Dataset::load(&self.storage, self.periods(), self.subjects(), Some(&codes)).await?;
        let quality = self.assess_quality(&dataset, &validation);

        let output_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.export.output_dir.clone());
        let context = ExportContext {
            generated_at: Local::now(),
            quality: quality.clone(),
            validation: validation.clone(),
            providers: self.router.get_providers_info().await,
            diff: stock_list.diff,
            interrupted,
        };
        let export_path = export_workbook(&dataset, &context, &output_dir, &self.config.export.file_prefix)?;

        self.record_store_counts().await;
        let (status, message) = if interrupted {
            (SyncStatus::Failed, Some("interrupted"))
        } else {
            (SyncStatus::Success, None)
        };
        self.storage
            .update_sync_metadata(SYNC_RUN, None, status, None, message)
            .await?;

        let summary = RunSummary {
            stocks: stock_list.companies.len(),
            diff: stock_list.diff,
            industries,
            financials,
            validation,
            quality,
            export_path,
            interrupted,
            elapsed: started.elapsed(),
        };
        info!(
            stocks = summary.stocks,
            interrupted,
            elapsed_secs = summary.elapsed.as_secs(),
            export = %summary.export_path.display(),
            "Collection run finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // Stock List
    // ========================================================================

    /// Fetch, merge, clean, validate and store the stock list.
    ///
    /// A resumed run records additions and renames but does not flag
    /// delistings, so its result never shrinks.
    pub async fn collect_stock_list(&self, resume: bool) -> Result<StockListOutcome> {
        let lists = match self
            .router
            .gather_stock_lists(self.config.collector.list_sources)
            .await
        {
            Ok(lists) => lists,
            Err(ProviderError::Cancelled) => {
                return Err(ashare_common::Error::Interrupted("stock list collection".into()).into());
            }
            Err(e) => {
                let stored = self.storage.get_companies().await?;
                if stored.is_empty() {
                    bail!("No source returned a stock list: {}", e);
                }
                warn!(error = %e, stored = stored.len(), "Stock list unavailable, using stored list");
                return Ok(StockListOutcome {
                    companies: stored,
                    diff: None,
                    validation: ValidationReport::default(),
                    sources: Vec::new(),
                });
            }
        };
        let sources: Vec<&'static str> = lists.iter().map(|l| l.source).collect();

        let merged: Vec<ListedCompany> = merge_stock_lists(&lists)
            .into_iter()
            .map(|m| {
                let mut company = m.record;
                if let Some(code) = normalize_code(&company.code) {
                    company.code = code;
                }
                if let Some(name) = clean_name(&company.name) {
                    company.name = name;
                }
                company
            })
            .collect();

        let (valid, validation) = validate_companies(merged);
        let (mut companies, dedup) = dedup_by_code(valid);
        companies.sort_by(|a, b| a.code.cmp(&b.code));
        info!(
            sources = ?sources,
            companies = companies.len(),
            invalid = validation.invalid,
            duplicates = dedup.removed(),
            "Merged stock list"
        );

        let previous = self.storage.get_companies().await?;
        let diff = StockDiff::compute(&previous, &companies);
        let summary = diff.summary();
        if !previous.is_empty() {
            info!("Stock list changes: {}", summary);
        }
        if !resume {
            self.storage.record_version(&summary).await?;
            if !previous.is_empty() {
                let delisted = self.storage.mark_delisted(&diff.removed_codes()).await?;
                if delisted > 0 {
                    info!(delisted, "Flagged delisted companies");
                }
            }
        }

        self.storage.save_companies(&companies).await?;
        let next_sync = chrono::Duration::from_std(Duration::from_secs(self.config.storage.cache_ttl_secs))
            .ok()
            .map(|ttl| Utc::now() + ttl);
        self.storage
            .update_sync_metadata(SYNC_STOCK_LIST, None, SyncStatus::Success, next_sync, None)
            .await?;
        if let Err(e) = self.backups.record_store(STORE_STOCKS, companies.len()) {
            warn!(error = %e, "Failed to update store metadata");
        }

        Ok(StockListOutcome {
            companies,
            diff: Some(summary),
            validation,
            sources,
        })
    }

    // ========================================================================
    // Per-code Stages
    // ========================================================================

    /// Companies not yet stored by a previous run, and how many were skipped.
    fn remaining(companies: &[ListedCompany], done: &HashSet<String>) -> (Vec<ListedCompany>, usize) {
        let units: Vec<ListedCompany> = companies
            .iter()
            .filter(|c| !done.contains(&c.code))
            .cloned()
            .collect();
        let resumed = companies.len() - units.len();
        (units, resumed)
    }

    pub async fn collect_industries(
        &self,
        pool: &WorkerPool,
        companies: &[ListedCompany],
        resume: bool,
    ) -> Result<(StageSummary, ValidationReport)> {
        let done = if resume {
            self.storage.industry_attempted_codes().await?
        } else {
            HashSet::new()
        };
        let (units, resumed) = Self::remaining(companies, &done);
        let router = self.router.as_ref();
        let storage = self.storage.as_ref();
        let max_sources = self.config.collector.max_sources_per_stock;

        let result = self
            .run_stage(STAGE_INDUSTRY, pool, units, resumed, |company| async move {
                collect_industry(router, storage, company, max_sources).await
            })
            .await;
        Ok(result)
    }

    pub async fn collect_financials(
        &self,
        pool: &WorkerPool,
        companies: &[ListedCompany],
        resume: bool,
    ) -> Result<(StageSummary, ValidationReport)> {
        let periods = self.periods();
        let subjects = self.subjects();
        if periods.is_empty() || subjects.is_empty() {
            warn!("No report periods or subjects configured, skipping financials");
            return Ok((StageSummary::default(), ValidationReport::default()));
        }

        let done = if resume {
            self.storage.metric_attempted_codes(&periods, &subjects).await?
        } else {
            HashSet::new()
        };
        let (units, resumed) = Self::remaining(companies, &done);
        let router = self.router.as_ref();
        let storage = self.storage.as_ref();
        let max_sources = self.config.collector.max_sources_per_stock;
        let (periods, subjects) = (periods.as_slice(), subjects.as_slice());

        let result = self
            .run_stage(STAGE_FINANCIALS, pool, units, resumed, |company| async move {
                collect_financials(router, storage, company, periods, subjects, max_sources).await
            })
            .await;
        Ok(result)
    }

    /// Drive one per-code stage through the pool with progress logging and
    /// periodic checkpoints.
    async fn run_stage<F, Fut>(
        &self,
        stage: &'static str,
        pool: &WorkerPool,
        units: Vec<ListedCompany>,
        resumed: usize,
        work: F,
    ) -> (StageSummary, ValidationReport)
    where
        F: Fn(ListedCompany) -> Fut,
        Fut: Future<Output = UnitResult>,
    {
        let mut summary = StageSummary {
            total: units.len() + resumed,
            resumed,
            ..Default::default()
        };
        let mut validation = ValidationReport::default();
        info!(stage, remaining = units.len(), resumed, workers = pool.max_workers(), "Starting stage");

        let mut tracker = ProgressTracker::new(stage, units.len(), self.config.collector.progress_interval);
        let checkpoint_every = self.config.collector.checkpoint_interval.max(1);
        let mut last_code: Option<String> = None;

        let outcome = pool
            .run(units, work, |result: UnitResult| {
                match result.outcome {
                    UnitOutcome::Collected => summary.collected += 1,
                    UnitOutcome::NoData => summary.no_data += 1,
                    UnitOutcome::Failed | UnitOutcome::Cancelled => summary.failed += 1,
                }
                if matches!(result.outcome, UnitOutcome::Collected | UnitOutcome::NoData) {
                    tracker.record_success();
                } else {
                    tracker.record_failure();
                }
                validation.absorb(result.validation);
                last_code = Some(result.code);

                if tracker.processed() % checkpoint_every == 0 {
                    self.save_checkpoint(stage, &tracker, CheckpointStatus::Running, last_code.clone());
                }
            })
            .await;

        summary.skipped = outcome.skipped;
        let status = if outcome.cancelled {
            CheckpointStatus::Interrupted
        } else {
            CheckpointStatus::Completed
        };
        self.save_checkpoint(stage, &tracker, status, last_code);
        tracker.log();

        info!(
            stage,
            collected = summary.collected,
            no_data = summary.no_data,
            failed = summary.failed,
            skipped = summary.skipped,
            "Stage finished"
        );
        (summary, validation)
    }

    fn save_checkpoint(
        &self,
        stage: &str,
        tracker: &ProgressTracker,
        status: CheckpointStatus,
        last_code: Option<String>,
    ) {
        let checkpoint = Checkpoint::new(stage, tracker.snapshot(), status).with_last_code(last_code);
        if let Err(e) = self.checkpoints.save(&checkpoint) {
            let error = format!("{:#}", e);
            warn!(stage, %error, "Failed to save checkpoint");
        }
    }

    // ========================================================================
    // Quality and Export
    // ========================================================================

    fn assess_quality(&self, dataset: &Dataset, validation: &ValidationReport) -> QualityReport {
        let today = Local::now().date_naive();
        let report = assess(&dataset.quality_inputs(validation, Some(today)), today);
        info!(
            score = report.overall,
            grade = report.grade.label(),
            completeness = report.completeness,
            accuracy = report.accuracy,
            coverage = report.coverage,
            "Data quality assessed"
        );
        for issue in &report.issues {
            warn!("Quality issue: {}", issue);
        }
        report
    }

    /// Export everything stored without fetching.
    pub async fn export_stored(&self, output_dir: Option<PathBuf>) -> Result<PathBuf> {
        let dataset = Dataset::load(&self.storage, self.periods(), self.subjects(), None).await?;
        if dataset.companies.is_empty() {
            bail!("No stored companies to export; run a collection first");
        }

        let validation = dataset.validation_report();
        let collected_on = self
            .storage
            .get_sync_metadata(SYNC_STOCK_LIST, None)
            .await?
            .map(|m| m.last_sync_at.with_timezone(&Local).date_naive());
        let today = Local::now().date_naive();
        let quality = assess(&dataset.quality_inputs(&validation, collected_on), today);
        let diff = self
            .storage
            .recent_versions(1)
            .await?
            .into_iter()
            .next()
            .map(|v| v.summary);

        let context = ExportContext {
            generated_at: Local::now(),
            quality,
            validation,
            providers: self.router.get_providers_info().await,
            diff,
            interrupted: false,
        };
        let output_dir = output_dir.unwrap_or_else(|| self.config.export.output_dir.clone());
        export_workbook(&dataset, &context, &output_dir, &self.config.export.file_prefix)
    }

    async fn record_store_counts(&self) {
        let counts = async {
            let stats = self.storage.get_stats().await?;
            self.backups.record_store(STORE_INDUSTRIES, stats.industry_count as usize)?;
            self.backups.record_store(STORE_METRICS, stats.metric_count as usize)?;
            anyhow::Ok(())
        };
        if let Err(e) = counts.await {
            let error = format!("{:#}", e);
            warn!(%error, "Failed to update store metadata");
        }
    }
}

// ============================================================================
// Units of Work
// ============================================================================

async fn collect_industry(
    router: &DataProviderRouter,
    storage: &LocalStorage,
    company: ListedCompany,
    max_sources: usize,
) -> UnitResult {
    let code = company.code;
    let checks = UnitValidation::default();

    // Each source is validated on its own so a rejected classification
    // leaves room for the next source.
    let gathered = router
        .gather_industry_with(&code, Some(&company.name), max_sources, |industry| {
            checks.with(|report| sanitize_industry(industry, report))
        })
        .await;

    let outcome = match gathered {
        Ok(results) => {
            let merged = merge_industry(&code, &results);
            debug!(code = %code, provenance = ?merged.provenance, "Merged industry");
            let outcome = if merged.record.is_empty() {
                UnitOutcome::NoData
            } else {
                UnitOutcome::Collected
            };
            stored(storage.save_industries(&[merged.record]).await, &code, outcome)
        }
        Err(ProviderError::DataNotAvailable(_)) => {
            let empty = IndustryClassification::empty(code.as_str(), "");
            stored(storage.save_industries(&[empty]).await, &code, UnitOutcome::NoData)
        }
        Err(ProviderError::Cancelled) => UnitOutcome::Cancelled,
        Err(e) => {
            warn!(code = %code, error = %e, "Industry collection failed");
            UnitOutcome::Failed
        }
    };
    let validation = checks.into_report();

    UnitResult {
        code,
        outcome,
        validation,
    }
}

async fn collect_financials(
    router: &DataProviderRouter,
    storage: &LocalStorage,
    company: ListedCompany,
    periods: &[NaiveDate],
    subjects: &[String],
    max_sources: usize,
) -> UnitResult {
    let code = company.code;
    let checks = UnitValidation::default();

    let gathered = router
        .gather_financials_with(&code, periods, subjects, max_sources, |mut metrics| {
            checks.with(|report| sanitize_metrics(&mut metrics, report));
            metrics
        })
        .await;

    let outcome = match gathered {
        Ok(results) => {
            let metrics = merge_metrics(&code, periods, subjects, &results);
            let outcome = if metrics.iter().any(|m| m.value.is_some()) {
                UnitOutcome::Collected
            } else {
                UnitOutcome::NoData
            };
            stored(storage.save_metrics(&metrics).await, &code, outcome)
        }
        Err(ProviderError::DataNotAvailable(_)) => {
            let nulls = merge_metrics(&code, periods, subjects, &[]);
            stored(storage.save_metrics(&nulls).await, &code, UnitOutcome::NoData)
        }
        Err(ProviderError::Cancelled) => UnitOutcome::Cancelled,
        Err(e) => {
            warn!(code = %code, error = %e, "Financial collection failed");
            UnitOutcome::Failed
        }
    };
    let validation = checks.into_report();

    UnitResult {
        code,
        outcome,
        validation,
    }
}
