//! Local cache source.
//!
//! Serves previously collected data from SQLite as the lowest-priority
//! provider, so a source outage still yields the last known values. Only
//! rows younger than the configured TTLs are served, and each keeps the tag
//! of the source that originally reported it.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::{FinancialMetric, IndustryClassification, ListedCompany};
use crate::storage::{LocalStorage, SYNC_STOCK_LIST};
use ashare_common::Config;

pub const NAME: &str = "cache_mapping";

fn storage_error(e: anyhow::Error) -> ProviderError {
    ProviderError::Internal(format!("local storage: {:#}", e))
}

pub struct CacheMappingAdapter {
    storage: Arc<LocalStorage>,
    priority: u8,
    /// Stock list and metrics
    cache_ttl: Duration,
    industry_ttl: Duration,
}

impl CacheMappingAdapter {
    pub fn new(storage: Arc<LocalStorage>, priority: u8, cache_ttl: Duration, industry_ttl: Duration) -> Self {
        Self {
            storage,
            priority,
            cache_ttl,
            industry_ttl,
        }
    }

    pub fn from_config(config: &Config, storage: Arc<LocalStorage>) -> Option<Self> {
        let source = config.source(NAME).filter(|s| s.enabled)?;
        Some(Self::new(
            storage,
            source.priority,
            Duration::from_secs(config.storage.cache_ttl_secs),
            Duration::from_secs(config.storage.industry_ttl_secs),
        ))
    }
}

#[async_trait]
impl DataProvider for CacheMappingAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::full()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.storage.company_count().await.map(|_| ()).map_err(storage_error)
    }

    async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
        let fresh = self
            .storage
            .get_sync_metadata(SYNC_STOCK_LIST, None)
            .await
            .map_err(storage_error)?
            .is_some_and(|meta| meta.is_fresh(self.cache_ttl));
        if !fresh {
            return Err(ProviderError::DataNotAvailable("cached stock list is stale".into()));
        }

        let companies = self.storage.get_companies().await.map_err(storage_error)?;
        if companies.is_empty() {
            return Err(ProviderError::DataNotAvailable("no cached stock list".into()));
        }
        Ok(companies)
    }

    async fn get_industry(
        &self,
        code: &str,
        _name: Option<&str>,
    ) -> Result<IndustryClassification, ProviderError> {
        self.storage
            .get_fresh_industry(code, self.industry_ttl)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no cached industry for {}", code)))
    }

    async fn get_financials(
        &self,
        code: &str,
        periods: &[NaiveDate],
        subjects: &[String],
    ) -> Result<Vec<FinancialMetric>, ProviderError> {
        let mut stored: HashMap<(NaiveDate, String), FinancialMetric> = self
            .storage
            .get_fresh_metrics(code, self.cache_ttl)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(|m| ((m.period, m.subject.clone()), m))
            .collect();

        let mut metrics = Vec::with_capacity(periods.len() * subjects.len());
        for period in periods {
            for subject in subjects {
                let metric = match stored.remove(&(*period, subject.clone())) {
                    Some(metric) if metric.value.is_some() => metric,
                    _ => FinancialMetric::new(code, *period, subject.clone(), None, ""),
                };
                metrics.push(metric);
            }
        }

        if metrics.iter().all(|m| m.value.is_none()) {
            return Err(ProviderError::DataNotAvailable(format!("no cached metrics for {}", code)));
        }
        Ok(metrics)
    }
}
