//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ashare_collector::data::{
    DataCapabilities, DataProvider, DataProviderRouter, FinancialMetric, IndustryClassification,
    ListedCompany, ProviderError, RouterConfig,
};
use ashare_collector::storage::LocalStorage;
use ashare_collector::CollectorPipeline;
use ashare_common::config::Config;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Ten valid A-share codes with names.
pub const STOCKS: &[(&str, &str)] = &[
    ("000001", "平安银行"),
    ("000002", "万科A"),
    ("000004", "国华网安"),
    ("300001", "特锐德"),
    ("300002", "神州泰岳"),
    ("600000", "浦发银行"),
    ("600004", "白云机场"),
    ("600006", "东风股份"),
    ("600007", "中国国贸"),
    ("600008", "首创环保"),
];

// ============================================================================
// Mock Source
// ============================================================================

/// In-memory source with configurable data and call counters.
pub struct MockSource {
    name: &'static str,
    priority: u8,
    companies: Vec<ListedCompany>,
    industries: HashMap<String, IndustryClassification>,
    metrics: HashMap<(String, NaiveDate, String), f64>,
    failing: bool,
    cancel_after: Option<(u32, CancellationToken)>,
    pub list_calls: AtomicU32,
    pub industry_calls: AtomicU32,
    pub financial_calls: AtomicU32,
}

impl MockSource {
    pub fn new(name: &'static str, priority: u8) -> Self {
        Self {
            name,
            priority,
            companies: Vec::new(),
            industries: HashMap::new(),
            metrics: HashMap::new(),
            failing: false,
            cancel_after: None,
            list_calls: AtomicU32::new(0),
            industry_calls: AtomicU32::new(0),
            financial_calls: AtomicU32::new(0),
        }
    }

    pub fn companies(mut self, stocks: &[(&str, &str)]) -> Self {
        self.companies = stocks
            .iter()
            .map(|(code, name)| ListedCompany::new(*code, *name, self.name))
            .collect();
        self
    }

    /// Industry from a raw source label for every code.
    pub fn industries(mut self, codes: &[&str], label: &str) -> Self {
        for code in codes {
            self.industries.insert(
                code.to_string(),
                IndustryClassification::from_raw_label(*code, label, None, self.name),
            );
        }
        self
    }

    pub fn industry(mut self, industry: IndustryClassification) -> Self {
        self.industries.insert(industry.code.clone(), industry);
        self
    }

    pub fn metric(mut self, code: &str, period: NaiveDate, subject: &str, value: f64) -> Self {
        self.metrics
            .insert((code.to_string(), period, subject.to_string()), value);
        self
    }

    /// Every request fails with a network error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Cancel `token` while serving the `n`th industry request.
    pub fn cancel_after(mut self, n: u32, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
            + self.industry_calls.load(Ordering::SeqCst)
            + self.financial_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), ProviderError> {
        if self.failing {
            Err(ProviderError::Network(format!("{} mock failure", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataProvider for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::full()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.check_failing()
    }

    async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        if self.companies.is_empty() {
            return Err(ProviderError::DataNotAvailable("no companies".into()));
        }
        Ok(self.companies.clone())
    }

    async fn get_industry(
        &self,
        code: &str,
        _name: Option<&str>,
    ) -> Result<IndustryClassification, ProviderError> {
        let calls = self.industry_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, token)) = &self.cancel_after {
            if calls >= *n {
                token.cancel();
            }
        }
        self.check_failing()?;
        self.industries
            .get(code)
            .cloned()
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no industry for {}", code)))
    }

    async fn get_financials(
        &self,
        code: &str,
        periods: &[NaiveDate],
        subjects: &[String],
    ) -> Result<Vec<FinancialMetric>, ProviderError> {
        self.financial_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let mut metrics = Vec::new();
        for period in periods {
            for subject in subjects {
                let value = self
                    .metrics
                    .get(&(code.to_string(), *period, subject.clone()))
                    .copied();
                metrics.push(FinancialMetric::new(code, *period, subject.clone(), value, self.name));
            }
        }
        Ok(metrics)
    }
}

// ============================================================================
// Pipeline Fixtures
// ============================================================================

/// Router config without retry delays.
pub fn fast_router_config() -> RouterConfig {
    RouterConfig {
        max_retries: 0,
        ..Default::default()
    }
}

pub async fn router_with(
    providers: Vec<Arc<MockSource>>,
    cancel: Option<CancellationToken>,
) -> DataProviderRouter {
    let mut router = DataProviderRouter::with_config(fast_router_config());
    if let Some(token) = cancel {
        router = router.with_cancellation(token);
    }
    for provider in providers {
        router.register(provider).await;
    }
    router
}

/// Config rooted in `dir` with one report period and two subjects.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.join("data");
    config.export.output_dir = dir.join("output");
    config.export.file_prefix = "test".into();
    config.request.max_retries = 0;
    config.request.retry_delay_ms = 1;
    config.collector.max_workers = 2;
    config.collector.checkpoint_interval = 2;
    config.collector.report_dates = vec!["2024-12-31".into()];
    config.collector.subjects = vec!["INVEST_REALESTATE".into(), "CIP".into()];
    config
}

pub async fn pipeline_with(
    config: &Config,
    providers: Vec<Arc<MockSource>>,
    cancel: CancellationToken,
) -> CollectorPipeline {
    let storage = Arc::new(LocalStorage::open(&config.storage).unwrap());
    let router = router_with(providers, Some(cancel.clone())).await;
    CollectorPipeline::new(config.clone(), Arc::new(router), storage, cancel)
}
