//! Market data module.
//!
//! Provides the listed-company, industry and financial-metric records and the
//! multi-source fetch layer that produces them:
//! - Ranked providers with priority failover
//! - Rotating request identity and randomized request pacing
//! - Exponential backoff retry and health tracking
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     DataProviderRouter                       │
//! │   priority order · retry/backoff · health · gather/failover  │
//! ├──────────────┬──────────────┬──────────────┬─────────────────┤
//! │  eastmoney   │ eastmoney_f10│     sina     │ tencent/cninfo/ │
//! │  (quote API) │   (F10 API)  │ (HTML/JSON)  │  cache_mapping  │
//! └──────────────┴──────────────┴──────────────┴─────────────────┘
//!                 HttpFetcher: User-Agent pool + RequestPacer
//! ```

pub mod cache_mapping;
pub mod cninfo;
pub mod eastmoney;
pub mod eastmoney_f10;
pub mod health;
pub mod http;
pub mod provider;
pub mod rate_limiter;
pub mod router;
pub mod sina;
pub mod tencent;
pub mod user_agent;

pub use cache_mapping::CacheMappingAdapter;
pub use cninfo::CninfoAdapter;
pub use eastmoney::EastmoneyAdapter;
pub use eastmoney_f10::EastmoneyF10Adapter;
pub use health::{HealthMonitor, HealthMonitorConfig, ProviderHealth};
pub use http::{HttpFetcher, PageEncoding};
pub use provider::{Capability, DataCapabilities, DataProvider, ProviderError, ProviderInfo};
pub use rate_limiter::{RateLimiter, RequestPacer};
pub use router::{DataProviderRouter, RouterConfig, Sourced};
pub use sina::SinaAdapter;
pub use tencent::TencentAdapter;
pub use user_agent::UserAgentPool;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Market
// ============================================================================

/// Listing market of an A-share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Shanghai,
    Shenzhen,
    Beijing,
    Unknown,
}

impl Market {
    /// Infer the market from a six-digit code.
    pub fn from_code(code: &str) -> Self {
        match code.as_bytes().first() {
            Some(b'6') => Self::Shanghai,
            Some(b'0') | Some(b'3') => Self::Shenzhen,
            Some(b'4') | Some(b'8') => Self::Beijing,
            _ => Self::Unknown,
        }
    }

    /// Chinese display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Shanghai => "上海",
            Self::Shenzhen => "深圳",
            Self::Beijing => "北交所",
            Self::Unknown => "未知",
        }
    }

    /// Exchange prefix used by Sina/Tencent/Eastmoney F10 ("sh", "sz", "bj").
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Shanghai => Some("sh"),
            Self::Shenzhen => Some("sz"),
            Self::Beijing => Some("bj"),
            Self::Unknown => None,
        }
    }

    /// Stable storage key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Shanghai => "shanghai",
            Self::Shenzhen => "shenzhen",
            Self::Beijing => "beijing",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_key(key: &str) -> Self {
        match key {
            "shanghai" => Self::Shanghai,
            "shenzhen" => Self::Shenzhen,
            "beijing" => Self::Beijing,
            _ => Self::Unknown,
        }
    }

    /// Eastmoney quote API market id ("1" for Shanghai, "0" otherwise).
    pub fn eastmoney_id(&self) -> Option<&'static str> {
        match self {
            Self::Shanghai => Some("1"),
            Self::Shenzhen | Self::Beijing => Some("0"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A listed company. Identity key is `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedCompany {
    /// Six-digit stock code, e.g. "600000"
    pub code: String,
    /// Display name
    pub name: String,
    pub market: Market,
    /// Listing date, when the source publishes it
    pub list_date: Option<NaiveDate>,
    /// Source tag
    pub source: String,
}

impl ListedCompany {
    pub fn new(code: impl Into<String>, name: impl Into<String>, source: impl Into<String>) -> Self {
        let code = code.into();
        let market = Market::from_code(&code);
        Self {
            code,
            name: name.into(),
            market,
            list_date: None,
            source: source.into(),
        }
    }

    pub fn with_list_date(mut self, list_date: Option<NaiveDate>) -> Self {
        self.list_date = list_date;
        self
    }
}

/// Three-level industry classification for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryClassification {
    pub code: String,
    /// Shenwan level-1 industry
    pub level1: Option<String>,
    pub level2: Option<String>,
    pub level3: Option<String>,
    /// Source tag; merged records carry every contributing source joined by '+'
    pub source: String,
}

impl IndustryClassification {
    /// An empty classification for `code`.
    pub fn empty(code: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            level1: None,
            level2: None,
            level3: None,
            source: source.into(),
        }
    }

    /// Build a classification from a raw source industry label.
    ///
    /// Level 1 is the inferred Shenwan industry, level 2 the raw label.
    pub fn from_raw_label(
        code: impl Into<String>,
        raw: &str,
        level3: Option<String>,
        source: impl Into<String>,
    ) -> Self {
        let raw = raw.trim();
        Self {
            code: code.into(),
            level1: Some(crate::processing::shenwan::infer_level1(raw).to_string()),
            level2: Some(raw.to_string()),
            level3,
            source: source.into(),
        }
    }

    /// Level 1 and level 2 are both known.
    pub fn is_complete(&self) -> bool {
        self.level1.is_some() && self.level2.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.level1.is_none() && self.level2.is_none() && self.level3.is_none()
    }
}

/// One balance-sheet value for `code` at a report period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialMetric {
    pub code: String,
    /// Report period end date
    pub period: NaiveDate,
    /// Subject key, e.g. "INVEST_REALESTATE"
    pub subject: String,
    /// Value in yuan; `None` when no source reported it
    pub value: Option<f64>,
    pub source: String,
}

impl FinancialMetric {
    pub fn new(
        code: impl Into<String>,
        period: NaiveDate,
        subject: impl Into<String>,
        value: Option<f64>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            period,
            subject: subject.into(),
            value,
            source: source.into(),
        }
    }

    /// Key identifying the cell this metric fills.
    pub fn cell(&self) -> (NaiveDate, &str) {
        (self.period, self.subject.as_str())
    }
}

// ============================================================================
// Balance-sheet Subjects
// ============================================================================

/// Supported balance-sheet subjects: (key, Chinese label).
pub const BALANCE_SHEET_SUBJECTS: &[(&str, &str)] = &[
    ("INVEST_REALESTATE", "投资性房地产"),
    ("FIXED_ASSET", "固定资产"),
    ("CIP", "在建工程"),
    ("USERIGHT_ASSET", "使用权资产"),
    ("INTANGIBLE_ASSET", "无形资产"),
    ("TOTAL_ASSETS", "资产总计"),
    ("TOTAL_LIABILITIES", "负债合计"),
    ("TOTAL_OWNER_EQUITY", "所有者权益(或股东权益)合计"),
];

/// Chinese label for a subject key.
pub fn subject_label(key: &str) -> Option<&'static str> {
    BALANCE_SHEET_SUBJECTS
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, label)| *label)
}

/// Parse report periods, skipping anything that is not a YYYY-MM-DD date.
pub fn parse_periods(dates: &[String]) -> Vec<NaiveDate> {
    let mut periods: Vec<NaiveDate> = dates
        .iter()
        .filter_map(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        .collect();
    periods.sort();
    periods.dedup();
    periods
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_from_code() {
        assert_eq!(Market::from_code("600000"), Market::Shanghai);
        assert_eq!(Market::from_code("688981"), Market::Shanghai);
        assert_eq!(Market::from_code("000001"), Market::Shenzhen);
        assert_eq!(Market::from_code("300750"), Market::Shenzhen);
        assert_eq!(Market::from_code("830799"), Market::Beijing);
        assert_eq!(Market::from_code("430047"), Market::Beijing);
        assert_eq!(Market::from_code(""), Market::Unknown);
    }

    #[test]
    fn test_market_ids() {
        assert_eq!(Market::Shanghai.eastmoney_id(), Some("1"));
        assert_eq!(Market::Shenzhen.eastmoney_id(), Some("0"));
        assert_eq!(Market::Shenzhen.prefix(), Some("sz"));
        assert_eq!(Market::Unknown.prefix(), None);
        assert_eq!(Market::Beijing.to_string(), "北交所");
        assert_eq!(Market::from_key(Market::Shenzhen.key()), Market::Shenzhen);
        assert_eq!(Market::from_key("mars"), Market::Unknown);
    }

    #[test]
    fn test_industry_from_raw_label() {
        let industry = IndustryClassification::from_raw_label("600000", " 银行Ⅱ ", None, "eastmoney");
        assert_eq!(industry.level1.as_deref(), Some("银行"));
        assert_eq!(industry.level2.as_deref(), Some("银行Ⅱ"));
        assert!(industry.level3.is_none());
        assert!(industry.is_complete());
    }

    #[test]
    fn test_subject_label() {
        assert_eq!(subject_label("INVEST_REALESTATE"), Some("投资性房地产"));
        assert_eq!(subject_label("total_assets"), Some("资产总计"));
        assert_eq!(subject_label("UNKNOWN"), None);
    }

    #[test]
    fn test_parse_periods_sorted_and_deduped() {
        let periods = parse_periods(&[
            "2024-12-31".into(),
            "bad".into(),
            "2023-12-31".into(),
            "2024-12-31".into(),
        ]);
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].to_string(), "2023-12-31");
    }
}
