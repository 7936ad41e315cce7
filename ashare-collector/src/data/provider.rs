//! Data provider abstraction for multi-source collection.
//!
//! Defines the `DataProvider` trait that every source implements,
//! enabling priority failover and health-based routing.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{FinancialMetric, IndustryClassification, ListedCompany};

// ============================================================================
// Provider Capabilities
// ============================================================================

/// A kind of data a provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    StockList,
    Industry,
    Financials,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StockList => write!(f, "stock_list"),
            Self::Industry => write!(f, "industry"),
            Self::Financials => write!(f, "financials"),
        }
    }
}

/// Capabilities supported by a data provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataCapabilities {
    /// Serves the full listed-company list
    pub stock_list: bool,
    /// Serves per-stock industry classification
    pub industry: bool,
    /// Serves per-stock balance-sheet values
    pub financials: bool,
    /// Rate limit (requests per minute)
    pub rate_limit_rpm: Option<u32>,
}

impl DataCapabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::StockList => self.stock_list,
            Capability::Industry => self.industry,
            Capability::Financials => self.financials,
        }
    }

    /// Every capability
    pub fn full() -> Self {
        Self {
            stock_list: true,
            industry: true,
            financials: true,
            rate_limit_rpm: None,
        }
    }

    pub fn with_rate_limit(mut self, rpm: Option<u32>) -> Self {
        self.rate_limit_rpm = rpm;
        self
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Access refused by the source
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// The source has no data for this stock
    DataNotAvailable(String),
    /// Provider is temporarily unavailable
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// Response could not be parsed
    Parse(String),
    /// Internal provider error
    Internal(String),
    /// The run was cancelled while the request was pending
    Cancelled,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Access refused: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Parse(msg) => write!(f, "Parse error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Check if the error is transient (worth retrying the same provider)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }

    /// Check if the next provider should be tried after this error
    pub fn should_failover(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_) | Self::Cancelled)
    }

    /// Check if the error says something about the provider's health.
    ///
    /// A per-stock miss or a rate limit does not.
    pub fn counts_against_health(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Auth(_) | Self::Unavailable(_) | Self::Parse(_) | Self::Internal(_)
        )
    }
}

// ============================================================================
// Data Provider Trait
// ============================================================================

/// Trait for A-share data sources.
///
/// All sources (eastmoney, sina, etc.) implement this trait to provide a
/// unified interface for the data router. Operations a source does not
/// serve keep the default `DataNotAvailable` implementation.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Get the provider name (e.g., "eastmoney", "sina")
    fn name(&self) -> &'static str;

    /// Get the provider priority (lower = higher priority)
    fn priority(&self) -> u8;

    /// Get the provider's capabilities
    fn capabilities(&self) -> DataCapabilities;

    /// Lightweight reachability check used by the health monitor.
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// Fetch the full listed-company list.
    async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
        Err(ProviderError::DataNotAvailable(format!(
            "{} does not serve stock lists",
            self.name()
        )))
    }

    /// Fetch the industry classification of one stock.
    ///
    /// `name` is the company name, used by sources that search by name.
    async fn get_industry(
        &self,
        code: &str,
        _name: Option<&str>,
    ) -> Result<IndustryClassification, ProviderError> {
        Err(ProviderError::DataNotAvailable(format!(
            "{} does not serve industry data for {}",
            self.name(),
            code
        )))
    }

    /// Fetch balance-sheet values for one stock.
    ///
    /// Returns one metric per requested (period, subject); cells the source
    /// does not report carry `value: None`.
    async fn get_financials(
        &self,
        code: &str,
        _periods: &[NaiveDate],
        _subjects: &[String],
    ) -> Result<Vec<FinancialMetric>, ProviderError> {
        Err(ProviderError::DataNotAvailable(format!(
            "{} does not serve financial data for {}",
            self.name(),
            code
        )))
    }
}

// ============================================================================
// Provider Info (for monitoring/debugging)
// ============================================================================

/// Information about a data provider for monitoring purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub priority: u8,
    pub enabled: bool,
    /// Current health status
    pub healthy: bool,
    pub capabilities: DataCapabilities,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Total requests made
    pub request_count: u64,
    /// Requests that produced data
    pub success_count: u64,
    pub avg_latency_ms: Option<f64>,
}

impl ProviderInfo {
    /// Create new provider info from a provider
    pub fn from_provider<P: DataProvider + ?Sized>(provider: &P, enabled: bool, healthy: bool) -> Self {
        Self {
            name: provider.name().to_string(),
            priority: provider.priority(),
            enabled,
            healthy,
            capabilities: provider.capabilities(),
            last_success: None,
            last_error: None,
            request_count: 0,
            success_count: 0,
            avg_latency_ms: None,
        }
    }

    /// Success rate in 0.0..=1.0, `None` before any request
    pub fn success_rate(&self) -> Option<f64> {
        if self.request_count == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.request_count as f64)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct ListOnly;

    #[async_trait]
    impl DataProvider for ListOnly {
        fn name(&self) -> &'static str {
            "list_only"
        }
        fn priority(&self) -> u8 {
            4
        }
        fn capabilities(&self) -> DataCapabilities {
            DataCapabilities {
                stock_list: true,
                ..Default::default()
            }
        }
        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
            Ok(vec![ListedCompany::new("600000", "浦发银行", "list_only")])
        }
    }

    #[test]
    fn test_capabilities_supports() {
        let caps = DataCapabilities {
            industry: true,
            ..Default::default()
        };
        assert!(caps.supports(Capability::Industry));
        assert!(!caps.supports(Capability::StockList));
        assert!(DataCapabilities::full().supports(Capability::Financials));
    }

    #[test]
    fn test_provider_error_recoverable() {
        assert!(ProviderError::Network("timeout".into()).is_recoverable());
        assert!(ProviderError::RateLimited { retry_after_secs: Some(60) }.is_recoverable());
        assert!(ProviderError::Unavailable("maintenance".into()).is_recoverable());
        assert!(!ProviderError::Auth("403".into()).is_recoverable());
        assert!(!ProviderError::DataNotAvailable("no data".into()).is_recoverable());
        assert!(!ProviderError::Parse("bad json".into()).is_recoverable());
    }

    #[test]
    fn test_provider_error_failover() {
        assert!(ProviderError::Network("timeout".into()).should_failover());
        assert!(ProviderError::DataNotAvailable("no data".into()).should_failover());
        assert!(ProviderError::RateLimited { retry_after_secs: None }.should_failover());
        assert!(!ProviderError::InvalidRequest("bad code".into()).should_failover());
        assert!(!ProviderError::Cancelled.should_failover());
    }

    #[test]
    fn test_provider_error_health() {
        assert!(ProviderError::Network("reset".into()).counts_against_health());
        assert!(ProviderError::Parse("html changed".into()).counts_against_health());
        assert!(!ProviderError::DataNotAvailable("none".into()).counts_against_health());
        assert!(!ProviderError::RateLimited { retry_after_secs: None }.counts_against_health());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30 seconds"));

        let err = ProviderError::Network("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_default_operations_are_unavailable() {
        let provider = ListOnly;
        assert_eq!(provider.get_stock_list().await.unwrap().len(), 1);

        let err = provider.get_industry("600000", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::DataNotAvailable(_)));

        let err = provider.get_financials("600000", &[], &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::DataNotAvailable(_)));
    }

    #[test]
    fn test_provider_info_success_rate() {
        let mut info = ProviderInfo::from_provider(&ListOnly, true, true);
        assert_eq!(info.success_rate(), None);
        info.request_count = 4;
        info.success_count = 1;
        assert_eq!(info.success_rate(), Some(0.25));
    }
}
