//! Eastmoney quote API adapter.
//!
//! Serves the full A-share list (paged `clist` endpoint) and the industry
//! board of a single stock (`stock/get`, field f127).
//!
//! # Data Sources
//! - Stock list: push2.eastmoney.com/api/qt/clist/get
//! - Industry board: push2.eastmoney.com/api/qt/stock/get

use ashare_common::Config;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::http::HttpFetcher;
use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::{IndustryClassification, ListedCompany, Market};
use crate::processing::cleaner::{clean_text, normalize_code};

pub const NAME: &str = "eastmoney";

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_BASE_URL: &str = "https://push2.eastmoney.com";

/// Request token expected by the quote endpoints
const UT: &str = "fa5fd1943c7b386f172d6893dbfba10b";

/// Shenzhen main board, ChiNext, Shanghai main board, STAR market, Beijing
const A_SHARE_FILTER: &str = "m:0 t:6,m:0 t:80,m:1 t:2,m:1 t:23,m:0 t:81 s:2048";

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 100;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClistResponse {
    #[serde(default)]
    rc: i32,
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Vec<ClistRow>,
}

#[derive(Debug, Deserialize)]
struct ClistRow {
    /// Code
    #[serde(default)]
    f12: Value,
    /// Name
    #[serde(default)]
    f14: Value,
    /// Listing date as YYYYMMDD
    #[serde(default)]
    f26: Value,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    rc: i32,
    data: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    f57: Value,
    /// Industry board name
    #[serde(default)]
    f127: Value,
}

/// Eastmoney fields mix strings, numbers and "-" placeholders.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    clean_text(&text)
}

fn parse_list_date(value: &Value) -> Option<NaiveDate> {
    let text = value_text(value)?;
    NaiveDate::parse_from_str(&text, "%Y%m%d").ok()
}

fn parse_rows(rows: Vec<ClistRow>) -> Vec<ListedCompany> {
    rows.into_iter()
        .filter_map(|row| {
            let code = normalize_code(&value_text(&row.f12)?)?;
            let name = value_text(&row.f14)?;
            let list_date = parse_list_date(&row.f26);
            Some(ListedCompany::new(code, name, NAME).with_list_date(list_date))
        })
        .collect()
}

/// Convert a six-digit code to the quote API's "market.code" secid.
pub fn to_secid(code: &str) -> Option<String> {
    let market = Market::from_code(code).eastmoney_id()?;
    Some(format!("{}.{}", market, code))
}

// ============================================================================
// Eastmoney Adapter
// ============================================================================

pub struct EastmoneyAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    priority: u8,
}

impl EastmoneyAdapter {
    pub fn new(priority: u8, fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            base_url: DEFAULT_BASE_URL.to_string(),
            priority,
        }
    }

    /// Create from config; `None` when the source is disabled.
    pub fn from_config(config: &Config) -> Option<Self> {
        let source = config.source(NAME).filter(|s| s.enabled)?;
        let fetcher = HttpFetcher::new(NAME, &config.request, source.rate_limit_rpm)
            .with_referer("https://quote.eastmoney.com/");
        Some(Self::new(source.priority, fetcher))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_page(&self, page: usize) -> Result<ClistData, ProviderError> {
        let url = format!("{}/api/qt/clist/get", self.base_url);
        let query = [
            ("pn", page.to_string()),
            ("pz", PAGE_SIZE.to_string()),
            ("po", "0".to_string()),
            ("np", "1".to_string()),
            ("fltt", "2".to_string()),
            ("invt", "2".to_string()),
            ("fid", "f12".to_string()),
            ("ut", UT.to_string()),
            ("fs", A_SHARE_FILTER.to_string()),
            ("fields", "f12,f13,f14,f26".to_string()),
        ];

        let response: ClistResponse = self.fetcher.get_json(&url, &query).await?;
        if response.rc != 0 {
            return Err(ProviderError::Unavailable(format!("clist rc={}", response.rc)));
        }
        Ok(response.data.unwrap_or(ClistData {
            total: 0,
            diff: Vec::new(),
        }))
    }

    async fn fetch_quote(&self, secid: &str, fields: &str) -> Result<Option<QuoteData>, ProviderError> {
        let url = format!("{}/api/qt/stock/get", self.base_url);
        let query = [
            ("secid", secid.to_string()),
            ("ut", UT.to_string()),
            ("fields", fields.to_string()),
        ];
        let response: QuoteResponse = self.fetcher.get_json(&url, &query).await?;
        if response.rc != 0 {
            return Err(ProviderError::Unavailable(format!("stock/get rc={}", response.rc)));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl DataProvider for EastmoneyAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            stock_list: true,
            industry: true,
            financials: false,
            rate_limit_rpm: Some(120),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        match self.fetch_quote("0.000001", "f57").await? {
            Some(_) => Ok(()),
            None => Err(ProviderError::Unavailable("empty health check response".into())),
        }
    }

    async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
        let mut companies = Vec::new();
        let mut total = usize::MAX;

        for page in 1..=MAX_PAGES {
            let data = match self.fetch_page(page).await {
                Ok(data) => data,
                Err(e) if !companies.is_empty() => {
                    warn!(page, error = %e, "Stock list page failed, keeping partial list");
                    break;
                }
                Err(e) => return Err(e),
            };

            if data.total > 0 {
                total = data.total;
            }
            if data.diff.is_empty() {
                break;
            }
            companies.extend(parse_rows(data.diff));
            debug!(page, fetched = companies.len(), total, "Fetched stock list page");

            if companies.len() >= total {
                break;
            }
        }

        if companies.is_empty() {
            return Err(ProviderError::DataNotAvailable("empty stock list".into()));
        }
        Ok(companies)
    }

    async fn get_industry(
        &self,
        code: &str,
        _name: Option<&str>,
    ) -> Result<IndustryClassification, ProviderError> {
        let secid = to_secid(code)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown market for {}", code)))?;

        let data = self
            .fetch_quote(&secid, "f57,f58,f127")
            .await?
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no quote for {}", code)))?;

        if value_text(&data.f57).as_deref() != Some(code) {
            debug!(code, "Quote response carries a different code");
        }

        let board = value_text(&data.f127)
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no industry board for {}", code)))?;
        Ok(IndustryClassification::from_raw_label(code, &board, None, NAME))
    }
}

// ============================================================================
// Tests
// ============================================================================
