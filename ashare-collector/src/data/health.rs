//! Health tracking for data sources.
//!
//! Every request outcome is recorded per source. The router consults the
//! monitor to skip sources that are failing, cooling down after a rate
//! limit, or producing data for almost no stocks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::provider::{DataProvider, ProviderError};

// ============================================================================
// Health Status
// ============================================================================

/// Health status and request statistics for a single source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub name: String,
    /// Whether the source is currently healthy
    pub healthy: bool,
    pub consecutive_failures: u32,
    /// When the source was last marked unhealthy
    pub unhealthy_since: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Requests are held back until this instant after a rate limit
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub total_requests: u64,
    /// Requests that produced data
    pub successful_requests: u64,
    /// Requests answered with "no data for this stock"
    pub misses: u64,
    pub total_latency_ms: u64,
}

impl ProviderHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            consecutive_failures: 0,
            unhealthy_since: None,
            last_request: None,
            last_success: None,
            last_error: None,
            rate_limited_until: None,
            total_requests: 0,
            successful_requests: 0,
            misses: 0,
            total_latency_ms: 0,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        let now = Utc::now();
        self.healthy = true;
        self.unhealthy_since = None;
        self.consecutive_failures = 0;
        self.last_request = Some(now);
        self.last_success = Some(now);
        self.last_error = None;
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_latency_ms += latency.as_millis() as u64;
    }

    /// The source answered but had nothing for the requested stock.
    pub fn record_miss(&mut self) {
        self.last_request = Some(Utc::now());
        self.total_requests += 1;
        self.misses += 1;
    }

    pub fn record_failure(&mut self, error: &str, unhealthy_threshold: u32) {
        self.consecutive_failures += 1;
        self.last_request = Some(Utc::now());
        self.last_error = Some(error.to_string());
        self.total_requests += 1;

        if self.consecutive_failures >= unhealthy_threshold {
            if self.healthy {
                warn!(
                    provider = %self.name,
                    failures = self.consecutive_failures,
                    "Provider marked unhealthy after {} consecutive failures",
                    unhealthy_threshold
                );
                self.unhealthy_since = Some(Utc::now());
            }
            self.healthy = false;
        }
    }

    pub fn record_rate_limited(&mut self, cooldown: Duration) {
        let cooldown = ChronoDuration::from_std(cooldown).unwrap_or_else(|_| ChronoDuration::seconds(60));
        self.rate_limited_until = Some(Utc::now() + cooldown);
        self.last_error = Some("rate limited".to_string());
    }

    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.rate_limited_until.map_or(false, |until| until > now)
    }

    /// Success rate in 0.0..=1.0; 1.0 before any request.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.successful_requests == 0 {
            None
        } else {
            Some(self.total_latency_ms as f64 / self.successful_requests as f64)
        }
    }

    /// Enough samples have been seen and the success rate is below `min_rate`.
    pub fn below_success_rate(&self, min_rate: f64, min_samples: u64) -> bool {
        self.total_requests >= min_samples && self.success_rate() < min_rate
    }
}

// ============================================================================
// Health Monitor Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Consecutive failures before marking unhealthy
    pub unhealthy_threshold: u32,
    /// Timeout for health check requests in seconds
    pub check_timeout_secs: u64,
    /// Unhealthy sources get one retry request after this many seconds
    pub recovery_secs: u64,
    /// Sources below this success rate are skipped
    pub min_success_rate: f64,
    /// Requests observed before the success-rate rule applies
    pub min_samples: u64,
    /// Cooldown after a rate limit without a Retry-After hint
    pub default_rate_limit_cooldown_secs: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            check_timeout_secs: 10,
            recovery_secs: 60,
            min_success_rate: 0.05,
            min_samples: 20,
            default_rate_limit_cooldown_secs: 60,
        }
    }
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Tracks health of every registered source.
pub struct HealthMonitor {
    health: Arc<RwLock<HashMap<String, ProviderHealth>>>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_config(HealthMonitorConfig::default())
    }

    pub fn with_config(config: HealthMonitorConfig) -> Self {
        Self {
            health: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    pub async fn register_provider(&self, name: &str) {
        let mut health = self.health.write().await;
        if !health.contains_key(name) {
            health.insert(name.to_string(), ProviderHealth::new(name));
            debug!(provider = name, "Registered provider for health monitoring");
        }
    }

    pub async fn unregister_provider(&self, name: &str) {
        self.health.write().await.remove(name);
        debug!(provider = name, "Unregistered provider from health monitoring");
    }

    pub async fn is_healthy(&self, name: &str) -> bool {
        let health = self.health.read().await;
        health.get(name).map(|h| h.healthy).unwrap_or(false)
    }

    /// Whether the router should send a request to this source now.
    ///
    /// Unhealthy sources become usable again once `recovery_secs` have
    /// passed, so a single success can restore them.
    pub async fn is_usable(&self, name: &str) -> bool {
        let health = self.health.read().await;
        let Some(h) = health.get(name) else {
            return false;
        };

        let now = Utc::now();
        if h.is_rate_limited(now) {
            return false;
        }
        if h.below_success_rate(self.config.min_success_rate, self.config.min_samples) {
            return false;
        }
        if h.healthy {
            return true;
        }
        h.unhealthy_since.map_or(true, |since| {
            now - since >= ChronoDuration::seconds(self.config.recovery_secs as i64)
        })
    }

    pub async fn get_health(&self, name: &str) -> Option<ProviderHealth> {
        self.health.read().await.get(name).cloned()
    }

    pub async fn get_all_health(&self) -> HashMap<String, ProviderHealth> {
        self.health.read().await.clone()
    }

    pub async fn healthy_providers(&self) -> Vec<String> {
        let health = self.health.read().await;
        health
            .iter()
            .filter(|(_, h)| h.healthy)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn record_success(&self, name: &str, latency: Duration) {
        let mut health = self.health.write().await;
        if let Some(h) = health.get_mut(name) {
            h.record_success(latency);
        }
    }

    pub async fn record_miss(&self, name: &str) {
        let mut health = self.health.write().await;
        if let Some(h) = health.get_mut(name) {
            h.record_miss();
        }
    }

    pub async fn record_failure(&self, name: &str, error: &str) {
        let mut health = self.health.write().await;
        if let Some(h) = health.get_mut(name) {
            h.record_failure(error, self.config.unhealthy_threshold);
        }
    }

    pub async fn record_rate_limited(&self, name: &str, retry_after_secs: Option<u64>) {
        let cooldown = Duration::from_secs(
            retry_after_secs.unwrap_or(self.config.default_rate_limit_cooldown_secs),
        );
        let mut health = self.health.write().await;
        if let Some(h) = health.get_mut(name) {
            h.record_rate_limited(cooldown);
            warn!(
                provider = name,
                cooldown_secs = cooldown.as_secs(),
                "Provider rate limited, cooling down"
            );
        }
    }

    /// Record the outcome of one provider call.
    pub async fn record_outcome<T>(
        &self,
        name: &str,
        outcome: &Result<T, ProviderError>,
        latency: Duration,
    ) {
        match outcome {
            Ok(_) => self.record_success(name, latency).await,
            Err(ProviderError::RateLimited { retry_after_secs }) => {
                self.record_rate_limited(name, *retry_after_secs).await
            }
            Err(e) if e.counts_against_health() => self.record_failure(name, &e.to_string()).await,
            Err(_) => self.record_miss(name).await,
        }
    }

    /// Perform a health check on a single provider
    pub async fn check_provider<P: DataProvider + ?Sized>(&self, provider: &P) -> bool {
        let name = provider.name();
        let timeout = Duration::from_secs(self.config.check_timeout_secs);
        let started = std::time::Instant::now();

        let check_result = tokio::time::timeout(timeout, provider.health_check()).await;

        let mut health = self.health.write().await;
        let status = health
            .entry(name.to_string())
            .or_insert_with(|| ProviderHealth::new(name));

        match check_result {
            Ok(Ok(())) => {
                if !status.healthy {
                    info!(provider = name, "Provider recovered and is now healthy");
                }
                status.record_success(started.elapsed());
                true
            }
            Ok(Err(e)) => {
                status.record_failure(&e.to_string(), self.config.unhealthy_threshold);
                debug!(provider = name, error = %e, "Provider health check failed");
                false
            }
            Err(_) => {
                status.record_failure("Health check timed out", self.config.unhealthy_threshold);
                debug!(provider = name, "Provider health check timed out");
                false
            }
        }
    }
}

impl Default for HealthMonitor {
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

    #[test]
    fn test_provider_health_new() {
        let health = ProviderHealth::new("test");
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.success_rate(), 1.0);
        assert!(health.avg_latency_ms().is_none());
    }

    #[test]
    fn test_failure_threshold() {
        let mut health = ProviderHealth::new("test");

        health.record_failure("error 1", 3);
        health.record_failure("error 2", 3);
        assert!(health.healthy);

        health.record_failure("error 3", 3);
        assert!(!health.healthy);
        assert!(health.unhealthy_since.is_some());
        assert_eq!(health.last_error.as_deref(), Some("error 3"));

        health.record_success(Duration::from_millis(40));
        assert!(health.healthy);
        assert!(health.unhealthy_since.is_none());
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn test_misses_lower_success_rate_but_not_health() {
        let mut health = ProviderHealth::new("test");
        health.record_success(Duration::from_millis(100));
        for _ in 0..3 {
            health.record_miss();
        }

        assert!(health.healthy);
        assert_eq!(health.total_requests, 4);
        assert!((health.success_rate() - 0.25).abs() < 1e-9);
        assert_eq!(health.avg_latency_ms(), Some(100.0));
    }

    #[test]
    fn test_below_success_rate_requires_samples() {
        let mut health = ProviderHealth::new("test");
        for _ in 0..5 {
            health.record_miss();
        }
        assert!(!health.below_success_rate(0.05, 20));
        for _ in 0..15 {
            health.record_miss();
        }
        assert!(health.below_success_rate(0.05, 20));
    }

    #[tokio::test]
    async fn test_monitor_register_and_usable() {
        let monitor = HealthMonitor::new();
        assert!(!monitor.is_usable("test").await);

        monitor.register_provider("test").await;
        assert!(monitor.is_healthy("test").await);
        assert!(monitor.is_usable("test").await);

        monitor.unregister_provider("test").await;
        assert!(!monitor.is_healthy("test").await);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_recovers_after_window() {
        let monitor = HealthMonitor::with_config(HealthMonitorConfig {
            recovery_secs: 0,
            ..Default::default()
        });
        monitor.register_provider("flaky").await;
        for _ in 0..3 {
            monitor.record_failure("flaky", "reset").await;
        }
        assert!(!monitor.is_healthy("flaky").await);
        assert!(monitor.is_usable("flaky").await);

        let strict = HealthMonitor::new();
        strict.register_provider("flaky").await;
        for _ in 0..3 {
            strict.record_failure("flaky", "reset").await;
        }
        assert!(!strict.is_usable("flaky").await);
    }

    #[tokio::test]
    async fn test_rate_limited_cooldown() {
        let monitor = HealthMonitor::new();
        monitor.register_provider("busy").await;
        monitor.record_rate_limited("busy", Some(30)).await;

        assert!(monitor.is_healthy("busy").await);
        assert!(!monitor.is_usable("busy").await);
    }

    #[tokio::test]
    async fn test_record_outcome_classification() {
        let monitor = HealthMonitor::new();
        monitor.register_provider("src").await;
        let latency = Duration::from_millis(5);

        monitor.record_outcome::<()>("src", &Ok(()), latency).await;
        monitor
            .record_outcome::<()>("src", &Err(ProviderError::DataNotAvailable("none".into())), latency)
            .await;
        monitor
            .record_outcome::<()>("src", &Err(ProviderError::Network("reset".into())), latency)
            .await;

        let health = monitor.get_health("src").await.unwrap();
        assert_eq!(health.total_requests, 3);
        assert_eq!(health.successful_requests, 1);
        assert_eq!(health.misses, 1);
        assert_eq!(health.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_healthy_providers() {
        let monitor = HealthMonitor::new();
        monitor.register_provider("provider1").await;
        monitor.register_provider("provider2").await;

        for _ in 0..3 {
            monitor.record_failure("provider2", "error").await;
        }

        let healthy = monitor.healthy_providers().await;
        assert_eq!(healthy, vec!["provider1".to_string()]);
    }
}
