//! Eastmoney F10 (company profile) adapter.
//!
//! Serves the industry of a stock from the company survey page and
//! balance-sheet values from the new finance-analysis endpoint.

use ashare_common::Config;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use super::http::HttpFetcher;
use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::{FinancialMetric, IndustryClassification, Market};
use crate::processing::cleaner::{clean_text, parse_number, parse_report_date};

pub const NAME: &str = "eastmoney_f10";

const DEFAULT_BASE_URL: &str = "https://emweb.securities.eastmoney.com";

/// Balance-sheet layouts: general, bank, securities, insurance.
///
/// The endpoint returns no rows when the layout does not match the company.
const COMPANY_TYPES: &[u8] = &[4, 3, 2, 1];

#[derive(Debug, Deserialize)]
struct SurveyResponse {
    jbzl: Option<SurveyBasics>,
}

#[derive(Debug, Deserialize)]
struct SurveyBasics {
    /// Industry
    #[serde(default)]
    sshy: Option<String>,
    /// CSRC industry, "门类-大类"
    #[serde(default)]
    sszjhhy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceSheetResponse {
    #[serde(default)]
    data: Option<Vec<Map<String, Value>>>,
}

/// "SH600000" style code used by the F10 pages.
fn f10_code(code: &str) -> Option<String> {
    let prefix = Market::from_code(code).prefix()?;
    Some(format!("{}{}", prefix.to_uppercase(), code))
}

/// Pick the finer part of a "门类-大类" CSRC label.
fn csrc_detail(label: &str) -> Option<String> {
    label.rsplit('-').next().and_then(clean_text)
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Turn balance-sheet rows into one metric per requested cell.
fn rows_to_metrics(
    code: &str,
    rows: &[Map<String, Value>],
    periods: &[NaiveDate],
    subjects: &[String],
) -> Vec<FinancialMetric> {
    let by_period: HashMap<NaiveDate, &Map<String, Value>> = rows
        .iter()
        .filter_map(|row| {
            let date = row.get("REPORT_DATE").and_then(Value::as_str)?;
            Some((parse_report_date(date)?, row))
        })
        .collect();

    let mut metrics = Vec::with_capacity(periods.len() * subjects.len());
    for period in periods {
        for subject in subjects {
            let value = by_period
                .get(period)
                .and_then(|row| row.get(subject.as_str()))
                .and_then(value_number);
            metrics.push(FinancialMetric::new(code, *period, subject.clone(), value, NAME));
        }
    }
    metrics
}

pub struct EastmoneyF10Adapter {
    fetcher: HttpFetcher,
    base_url: String,
    priority: u8,
}

impl EastmoneyF10Adapter {
    pub fn new(priority: u8, fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            base_url: DEFAULT_BASE_URL.to_string(),
            priority,
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        let source = config.source(NAME).filter(|s| s.enabled)?;
        let fetcher = HttpFetcher::new(NAME, &config.request, source.rate_limit_rpm)
            .with_referer("https://emweb.securities.eastmoney.com/");
        Some(Self::new(source.priority, fetcher))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_survey(&self, f10: &str) -> Result<SurveyResponse, ProviderError> {
        let url = format!("{}/PC_HSF10/CompanySurvey/CompanySurveyAjax", self.base_url);
        self.fetcher.get_json(&url, &[("code", f10.to_string())]).await
    }

    async fn fetch_balance_sheet(
        &self,
        f10: &str,
        company_type: u8,
        periods: &[NaiveDate],
    ) -> Result<Vec<Map<String, Value>>, ProviderError> {
        let url = format!("{}/PC_HSF10/NewFinanceAnalysis/zcfzbAjaxNew", self.base_url);
        let dates = periods
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect::<Vec<_>>()
            .join(",");
        let query = [
            ("companyType", company_type.to_string()),
            ("reportDateType", "0".to_string()),
            ("reportType", "1".to_string()),
            ("dates", dates),
            ("code", f10.to_string()),
        ];
        let response: BalanceSheetResponse = self.fetcher.get_json(&url, &query).await?;
        Ok(response.data.unwrap_or_default())
    }
}

#[async_trait]
impl DataProvider for EastmoneyF10Adapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            stock_list: false,
            industry: true,
            financials: true,
            rate_limit_rpm: Some(60),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.fetch_survey("SZ000001").await.map(|_| ())
    }

    async fn get_industry(
        &self,
        code: &str,
        _name: Option<&str>,
    ) -> Result<IndustryClassification, ProviderError> {
        let f10 = f10_code(code)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown market for {}", code)))?;
        let basics = self
            .fetch_survey(&f10)
            .await?
            .jbzl
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no company survey for {}", code)))?;

        let industry = basics
            .sshy
            .as_deref()
            .and_then(clean_text)
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no industry for {}", code)))?;
        let detail = basics.sszjhhy.as_deref().and_then(csrc_detail);

        Ok(IndustryClassification::from_raw_label(code, &industry, detail, NAME))
    }

    async fn get_financials(
        &self,
        code: &str,
        periods: &[NaiveDate],
        subjects: &[String],
    ) -> Result<Vec<FinancialMetric>, ProviderError> {
        if periods.is_empty() || subjects.is_empty() {
            return Ok(Vec::new());
        }
        let f10 = f10_code(code)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown market for {}", code)))?;

        for company_type in COMPANY_TYPES {
            let rows = self.fetch_balance_sheet(&f10, *company_type, periods).await?;
            if !rows.is_empty() {
                debug!(code, company_type, rows = rows.len(), "Fetched balance sheet");
                return Ok(rows_to_metrics(code, &rows, periods, subjects));
            }
        }

        Err(ProviderError::DataNotAvailable(format!("no balance sheet for {}", code)))
    }
}
