//! Data provider router for multi-source failover.
//!
//! Routes requests to usable providers in priority order, retrying
//! transient errors with exponential backoff before failing over to the
//! next provider. `gather` keeps going past the first success so the
//! caller can merge several sources field by field.

use ashare_common::Config;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::health::{HealthMonitor, HealthMonitorConfig};
use super::provider::{Capability, DataProvider, ProviderError, ProviderInfo};
use super::{FinancialMetric, IndustryClassification, ListedCompany};

// ============================================================================
// Router Configuration
// ============================================================================

/// Configuration for the data provider router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum retries per provider before failover
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Multiplier applied after every retry
    pub backoff_factor: f64,
    /// Cap on a single retry delay
    pub max_retry_delay: Duration,
    /// Health monitor configuration
    pub health_config: HealthMonitorConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(30),
            health_config: HealthMonitorConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.request.max_retries,
            retry_delay: Duration::from_millis(config.request.retry_delay_ms),
            backoff_factor: config.request.backoff_factor,
            max_retry_delay: Duration::from_millis(config.request.max_retry_delay_ms),
            health_config: HealthMonitorConfig {
                unhealthy_threshold: config.collector.unhealthy_threshold,
                min_success_rate: config.collector.min_success_rate,
                min_samples: config.collector.min_samples,
                check_timeout_secs: config.request.timeout_secs,
                ..Default::default()
            },
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.retry_delay.as_millis() as f64 * self.backoff_factor.powi(exp);
        let capped = millis.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

// ============================================================================
// Sourced Results
// ============================================================================

/// A provider result tagged with where it came from.
#[derive(Debug, Clone)]
pub struct Sourced<T> {
    pub source: &'static str,
    pub priority: u8,
    pub data: T,
}

struct ProviderEntry {
    provider: Arc<dyn DataProvider>,
    enabled: bool,
}

// ============================================================================
// Data Provider Router
// ============================================================================

/// Routes data requests to usable providers with automatic failover.
pub struct DataProviderRouter {
    /// Registered providers sorted by priority
    providers: RwLock<Vec<ProviderEntry>>,
    health_monitor: Arc<HealthMonitor>,
    config: RouterConfig,
    cancel: Option<CancellationToken>,
}

impl DataProviderRouter {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        let health_monitor = Arc::new(HealthMonitor::with_config(config.health_config.clone()));
        Self {
            providers: RwLock::new(Vec::new()),
            health_monitor,
            config,
            cancel: None,
        }
    }

    /// Abort retry waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a provider with the router.
    ///
    /// Providers are kept sorted by priority (lower = higher priority).
    pub async fn register(&self, provider: Arc<dyn DataProvider>) {
        let name = provider.name();
        let priority = provider.priority();

        self.health_monitor.register_provider(name).await;

        let mut providers = self.providers.write().await;
        providers.retain(|e| e.provider.name() != name);
        providers.push(ProviderEntry {
            provider,
            enabled: true,
        });
        providers.sort_by_key(|e| e.provider.priority());

        info!(provider = name, priority, "Registered data provider");
    }

    pub async fn unregister(&self, name: &str) {
        self.health_monitor.unregister_provider(name).await;
        self.providers.write().await.retain(|e| e.provider.name() != name);
        info!(provider = name, "Unregistered data provider");
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) {
        let mut providers = self.providers.write().await;
        if let Some(entry) = providers.iter_mut().find(|e| e.provider.name() == name) {
            entry.enabled = enabled;
            info!(provider = name, enabled, "Provider enabled status changed");
        }
    }

    /// Registered provider names in priority order.
    pub async fn provider_names(&self) -> Vec<&'static str> {
        self.providers
            .read()
            .await
            .iter()
            .map(|e| e.provider.name())
            .collect()
    }

    pub async fn get_providers_info(&self) -> Vec<ProviderInfo> {
        let providers = self.providers.read().await;
        let mut infos = Vec::with_capacity(providers.len());

        for entry in providers.iter() {
            let health = self.health_monitor.get_health(entry.provider.name()).await;
            let healthy = health.as_ref().map(|h| h.healthy).unwrap_or(false);

            let mut info = ProviderInfo::from_provider(entry.provider.as_ref(), entry.enabled, healthy);
            if let Some(h) = health {
                info.avg_latency_ms = h.avg_latency_ms();
                info.last_success = h.last_success;
                info.last_error = h.last_error;
                info.request_count = h.total_requests;
                info.success_count = h.successful_requests;
            }
            infos.push(info);
        }

        infos
    }

    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health_monitor)
    }

    /// Run a health check against every enabled provider.
    pub async fn check_all_health(&self) -> Vec<(&'static str, bool)> {
        let providers: Vec<Arc<dyn DataProvider>> = {
            let providers = self.providers.read().await;
            providers
                .iter()
                .filter(|e| e.enabled)
                .map(|e| Arc::clone(&e.provider))
                .collect()
        };

        let mut results = Vec::with_capacity(providers.len());
        for provider in providers {
            let ok = self.health_monitor.check_provider(provider.as_ref()).await;
            results.push((provider.name(), ok));
        }
        results
    }

    /// Enabled providers serving `capability`, usable ones first.
    ///
    /// When none is usable every capable provider is returned as a last resort.
    async fn candidates(&self, capability: Capability) -> Result<Vec<Arc<dyn DataProvider>>, ProviderError> {
        let capable: Vec<Arc<dyn DataProvider>> = {
            let providers = self.providers.read().await;
            providers
                .iter()
                .filter(|e| e.enabled && e.provider.capabilities().supports(capability))
                .map(|e| Arc::clone(&e.provider))
                .collect()
        };

        if capable.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "No enabled provider serves {}",
                capability
            )));
        }

        let mut usable = Vec::with_capacity(capable.len());
        for provider in &capable {
            if self.health_monitor.is_usable(provider.name()).await {
                usable.push(Arc::clone(provider));
            }
        }

        if usable.is_empty() {
            warn!(%capability, "No usable providers available, trying all providers");
            Ok(capable)
        } else {
            Ok(usable)
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |t| t.is_cancelled())
    }

    /// Sleep unless the run is cancelled first.
    async fn pause(&self, delay: Duration) -> Result<(), ProviderError> {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Call one provider, retrying transient errors with backoff.
    async fn call_with_retry<T, F, Fut>(
        &self,
        provider: &Arc<dyn DataProvider>,
        request_fn: &F,
    ) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn DataProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let name = provider.name();
        let mut attempt = 0u32;

        loop {
            if self.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let started = Instant::now();
            let outcome = request_fn(Arc::clone(provider)).await;
            self.health_monitor
                .record_outcome(name, &outcome, started.elapsed())
                .await;

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_recoverable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = match &err {
                ProviderError::RateLimited {
                    retry_after_secs: Some(secs),
                } => Duration::from_secs(*secs).min(self.config.max_retry_delay),
                _ => self.config.backoff_delay(attempt),
            };
            debug!(
                provider = name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying request"
            );
            self.pause(delay).await?;
        }
    }

    /// Execute a request with automatic failover.
    ///
    /// Tries providers in priority order until one succeeds or all fail.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        capability: Capability,
        request_fn: F,
    ) -> Result<Sourced<T>, ProviderError>
    where
        F: Fn(Arc<dyn DataProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut results = self.gather(capability, 1, request_fn, |_| false).await?;
        results
            .pop()
            .ok_or_else(|| ProviderError::Internal("gather returned no result".into()))
    }

    /// Collect results from providers in priority order.
    ///
    /// Stops after `max_sources` successes or once `is_complete` holds for
    /// the results so far. Fails only when no provider succeeded; an error
    /// that rules out failover ends the search with what was gathered.
    pub async fn gather<T, F, Fut, C>(
        &self,
        capability: Capability,
        max_sources: usize,
        request_fn: F,
        is_complete: C,
    ) -> Result<Vec<Sourced<T>>, ProviderError>
    where
        F: Fn(Arc<dyn DataProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        C: Fn(&[Sourced<T>]) -> bool,
    {
        let candidates = self.candidates(capability).await?;
        let max_sources = max_sources.max(1);
        let mut results: Vec<Sourced<T>> = Vec::new();
        let mut last_error = None;

        for provider in candidates {
            let name = provider.name();
            match self.call_with_retry(&provider, &request_fn).await {
                Ok(data) => {
                    debug!(provider = name, %capability, "Provider returned data");
                    results.push(Sourced {
                        source: name,
                        priority: provider.priority(),
                        data,
                    });
                    if results.len() >= max_sources || is_complete(&results) {
                        break;
                    }
                }
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) if !e.should_failover() => {
                    if results.is_empty() {
                        return Err(e);
                    }
                    warn!(provider = name, %capability, error = %e, "Provider failed, keeping earlier results");
                    break;
                }
                Err(e) => {
                    debug!(provider = name, %capability, error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        if results.is_empty() {
            Err(last_error.unwrap_or_else(|| ProviderError::Unavailable("All providers failed".into())))
        } else {
            Ok(results)
        }
    }

    // ========================================================================
    // Typed Requests
    // ========================================================================

    /// Fetch the stock list from the first provider that serves it.
    pub async fn get_stock_list(&self) -> Result<Sourced<Vec<ListedCompany>>, ProviderError> {
        self.execute_with_failover(Capability::StockList, |p| async move {
            p.get_stock_list().await
        })
        .await
    }

    /// Fetch stock lists from up to `max_sources` providers.
    pub async fn gather_stock_lists(
        &self,
        max_sources: usize,
    ) -> Result<Vec<Sourced<Vec<ListedCompany>>>, ProviderError> {
        self.gather(
            Capability::StockList,
            max_sources,
            |p| async move {
                let list = p.get_stock_list().await?;
                if list.is_empty() {
                    Err(ProviderError::DataNotAvailable("empty stock list".into()))
                } else {
                    Ok(list)
                }
            },
            |_| false,
        )
        .await
    }

    /// Fetch industry classifications until level 1 and level 2 are known.
    pub async fn gather_industry(
        &self,
        code: &str,
        name: Option<&str>,
        max_sources: usize,
    ) -> Result<Vec<Sourced<IndustryClassification>>, ProviderError> {
        self.gather_industry_with(code, name, max_sources, |industry| industry)
            .await
    }

    /// Like [`gather_industry`](Self::gather_industry), passing each source's
    /// classification through `check` first. A classification `check` empties
    /// counts as no data, so the next source is asked.
    pub async fn gather_industry_with<S>(
        &self,
        code: &str,
        name: Option<&str>,
        max_sources: usize,
        check: S,
    ) -> Result<Vec<Sourced<IndustryClassification>>, ProviderError>
    where
        S: Fn(IndustryClassification) -> IndustryClassification,
    {
        let check = &check;
        self.gather(
            Capability::Industry,
            max_sources,
            |p| async move {
                let industry = check(p.get_industry(code, name).await?);
                if industry.is_empty() {
                    Err(ProviderError::DataNotAvailable(format!("no industry for {}", code)))
                } else {
                    Ok(industry)
                }
            },
            |results| {
                results.iter().any(|r| r.data.level1.is_some())
                    && results.iter().any(|r| r.data.level2.is_some())
            },
        )
        .await
    }

    /// Fetch balance-sheet values until every requested cell has a value.
    pub async fn gather_financials(
        &self,
        code: &str,
        periods: &[NaiveDate],
        subjects: &[String],
        max_sources: usize,
    ) -> Result<Vec<Sourced<Vec<FinancialMetric>>>, ProviderError> {
        self.gather_financials_with(code, periods, subjects, max_sources, |metrics| metrics)
            .await
    }

    /// Like [`gather_financials`](Self::gather_financials), passing each
    /// source's values through `check` first. Only values left after `check`
    /// count towards a filled cell.
    pub async fn gather_financials_with<S>(
        &self,
        code: &str,
        periods: &[NaiveDate],
        subjects: &[String],
        max_sources: usize,
        check: S,
    ) -> Result<Vec<Sourced<Vec<FinancialMetric>>>, ProviderError>
    where
        S: Fn(Vec<FinancialMetric>) -> Vec<FinancialMetric>,
    {
        let wanted = periods.len() * subjects.len();
        let check = &check;
        self.gather(
            Capability::Financials,
            max_sources,
            |p| async move {
                let metrics = check(p.get_financials(code, periods, subjects).await?);
                if metrics.iter().all(|m| m.value.is_none()) {
                    Err(ProviderError::DataNotAvailable(format!("no financials for {}", code)))
                } else {
                    Ok(metrics)
                }
            },
            |results| {
                let filled: HashSet<(NaiveDate, &str)> = results
                    .iter()
                    .flat_map(|r| r.data.iter())
                    .filter(|m| m.value.is_some())
                    .map(|m| m.cell())
                    .collect();
                filled.len() >= wanted
            },
        )
        .await
    }
}

impl Default for DataProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DataCapabilities;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockProvider {
        name: &'static str,
        priority: u8,
        calls: AtomicU32,
        should_fail: bool,
    }

    impl MockProvider {
        fn new(name: &'static str, priority: u8, should_fail: bool) -> Self {
            Self {
                name,
                priority,
                calls: AtomicU32::new(0),
                should_fail,
            }
        }
    }

    #[async_trait]
    impl DataProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> DataCapabilities {
            DataCapabilities {
                stock_list: true,
                industry: true,
                ..Default::default()
            }
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            if self.should_fail {
                Err(ProviderError::Unavailable("mock failure".into()))
            } else {
                Ok(())
            }
        }

        async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.should_fail {
                Err(ProviderError::Network("mock failure".into()))
            } else {
                Ok(vec![ListedCompany::new("600000", "浦发银行", self.name)])
            }
        }
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let config = RouterConfig {
            retry_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_retry_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_router_config_from_app_config() {
        let mut config = Config::default();
        config.request.max_retries = 7;
        config.collector.unhealthy_threshold = 4;
        let router_config = RouterConfig::from_config(&config);
        assert_eq!(router_config.max_retries, 7);
        assert_eq!(router_config.retry_delay, Duration::from_millis(2000));
        assert_eq!(router_config.health_config.unhealthy_threshold, 4);
    }

    #[tokio::test]
    async fn test_register_sorts_by_priority() {
        let router = DataProviderRouter::with_config(fast_config());
        router.register(Arc::new(MockProvider::new("low", 5, false))).await;
        router.register(Arc::new(MockProvider::new("high", 1, false))).await;
        router.register(Arc::new(MockProvider::new("mid", 3, false))).await;

        assert_eq!(router.provider_names().await, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_failover_to_secondary() {
        let router = DataProviderRouter::with_config(fast_config());
        let primary = Arc::new(MockProvider::new("primary", 1, true));
        let secondary = Arc::new(MockProvider::new("secondary", 2, false));
        router.register(primary.clone()).await;
        router.register(secondary.clone()).await;

        let result = router.get_stock_list().await.unwrap();
        assert_eq!(result.source, "secondary");
        // initial attempt + 2 retries
        assert_eq!(primary.calls.load(Ordering::Relaxed), 3);
        assert_eq!(secondary.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_disabled_provider_skipped() {
        let router = DataProviderRouter::with_config(fast_config());
        let first = Arc::new(MockProvider::new("first", 1, false));
        router.register(first.clone()).await;
        router.register(Arc::new(MockProvider::new("second", 2, false))).await;
        router.set_enabled("first", false).await;

        let result = router.get_stock_list().await.unwrap();
        assert_eq!(result.source, "second");
        assert_eq!(first.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let router = DataProviderRouter::with_config(fast_config());
        router.register(Arc::new(MockProvider::new("a", 1, true))).await;
        router.register(Arc::new(MockProvider::new("b", 2, true))).await;

        let err = router.get_stock_list().await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn test_no_capable_provider() {
        let router = DataProviderRouter::with_config(fast_config());
        router.register(Arc::new(MockProvider::new("a", 1, false))).await;

        let err = router
            .gather_financials("600000", &[], &[], 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_providers_info_reflects_requests() {
        let router = DataProviderRouter::with_config(fast_config());
        router.register(Arc::new(MockProvider::new("ok", 1, false))).await;
        router.get_stock_list().await.unwrap();

        let info = router.get_providers_info().await;
        assert_eq!(info.len(), 1);
        assert!(info[0].healthy);
        assert!(info[0].enabled);
        assert_eq!(info[0].request_count, 1);
        assert_eq!(info[0].success_rate(), Some(1.0));
    }

    #[tokio::test]
    async fn test_gather_keeps_results_before_invalid_request() {
        let router = DataProviderRouter::with_config(fast_config());
        let third = Arc::new(MockProvider::new("third", 3, false));
        router.register(Arc::new(MockProvider::new("first", 1, false))).await;
        router.register(Arc::new(MockProvider::new("second", 2, false))).await;
        router.register(third.clone()).await;

        let results = router
            .gather(
                Capability::StockList,
                3,
                |p| async move {
                    if p.name() == "second" {
                        Err(ProviderError::InvalidRequest("bad code".into()))
                    } else {
                        p.get_stock_list().await
                    }
                },
                |_| false,
            )
            .await
            .unwrap();

        let sources: Vec<&str> = results.iter().map(|r| r.source).collect();
        assert_eq!(sources, vec!["first"]);
        assert_eq!(third.calls.load(Ordering::Relaxed), 0);

        let err = router
            .gather(
                Capability::StockList,
                3,
                |_| async { Err::<Vec<ListedCompany>, _>(ProviderError::InvalidRequest("bad code".into())) },
                |_| false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_cancelled_router_stops_before_calling() {
        let token = CancellationToken::new();
        let router = DataProviderRouter::with_config(fast_config()).with_cancellation(token.clone());
        let provider = Arc::new(MockProvider::new("a", 1, false));
        router.register(provider.clone()).await;

        token.cancel();
        let err = router.get_stock_list().await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::Relaxed), 0);
    }
}
