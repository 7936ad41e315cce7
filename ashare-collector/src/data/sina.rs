//! Sina Finance adapter.
//!
//! Serves the A-share list (paged market-center JSON), the industry board
//! from the company profile page, and balance-sheet values scraped from
//! the yearly balance-sheet table. Profile and report pages are GBK.

use ashare_common::Config;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::http::{HttpFetcher, PageEncoding};
use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::{subject_label, FinancialMetric, IndustryClassification, ListedCompany};
use crate::processing::cleaner::{clean_text, normalize_code, parse_number, parse_report_date};

pub const NAME: &str = "sina";

const DEFAULT_VIP_URL: &str = "https://vip.stock.finance.sina.com.cn";
const DEFAULT_MONEY_URL: &str = "https://money.finance.sina.com.cn";

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 80;

/// Report tables are published in units of 10,000 yuan.
const WAN: f64 = 10_000.0;

#[derive(Debug, Deserialize)]
struct NodeRow {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    name: String,
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn selector(css: &str) -> Result<Selector, ProviderError> {
    Selector::parse(css).map_err(|e| ProviderError::Internal(format!("bad selector {}: {}", css, e)))
}

fn parse_node_rows(rows: Vec<NodeRow>) -> Vec<ListedCompany> {
    rows.into_iter()
        .filter_map(|row| {
            let raw = if row.code.is_empty() { &row.symbol } else { &row.code };
            let code = normalize_code(raw)?;
            let name = clean_text(&row.name)?;
            Some(ListedCompany::new(code, name, NAME))
        })
        .collect()
}

/// Extract the industry board from the company profile page.
///
/// The board sits in the third row of the `comInfo1` table titled
/// "所属行业板块".
fn parse_industry_page(html: &str) -> Result<Option<String>, ProviderError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table.comInfo1")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;

    for table in document.select(&table_sel) {
        let rows: Vec<ElementRef<'_>> = table.select(&row_sel).collect();
        let Some(title) = rows.first().and_then(|r| r.select(&cell_sel).next()) else {
            continue;
        };
        if !cell_text(title).contains("所属行业板块") {
            continue;
        }
        let industry = rows
            .get(2)
            .and_then(|r| r.select(&cell_sel).next())
            .map(cell_text)
            .and_then(|t| clean_text(&t));
        if industry.is_some() {
            return Ok(industry);
        }
    }
    Ok(None)
}

/// Parse the balance-sheet table into `(period, label) -> value in yuan`.
fn parse_balance_sheet(html: &str) -> Result<HashMap<(NaiveDate, String), Option<f64>>, ProviderError> {
    let document = Html::parse_document(html);
    let row_sel = selector("table#BalanceSheetNewTable0 tr")?;
    let cell_sel = selector("td")?;

    let mut dates: Vec<Option<NaiveDate>> = Vec::new();
    let mut values = HashMap::new();

    for row in document.select(&row_sel) {
        let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
        let Some((label, rest)) = cells.split_first() else {
            continue;
        };
        let label: String = label.split_whitespace().collect();

        if label == "报表日期" {
            dates = rest.iter().map(|d| parse_report_date(d)).collect();
            continue;
        }
        if dates.is_empty() || label.is_empty() {
            continue;
        }

        for (date, raw) in dates.iter().zip(rest) {
            if let Some(date) = date {
                let value = parse_number(raw).map(|v| v * WAN);
                values.insert((*date, label.clone()), value);
            }
        }
    }

    if dates.is_empty() {
        return Err(ProviderError::Parse("balance sheet table not found".into()));
    }
    Ok(values)
}

pub struct SinaAdapter {
    fetcher: HttpFetcher,
    vip_url: String,
    money_url: String,
    priority: u8,
}

impl SinaAdapter {
    pub fn new(priority: u8, fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            vip_url: DEFAULT_VIP_URL.to_string(),
            money_url: DEFAULT_MONEY_URL.to_string(),
            priority,
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        let source = config.source(NAME).filter(|s| s.enabled)?;
        let fetcher = HttpFetcher::new(NAME, &config.request, source.rate_limit_rpm)
            .with_referer("https://finance.sina.com.cn/");
        Some(Self::new(source.priority, fetcher))
    }

    /// Point both Sina hosts at one base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.vip_url = base.clone();
        self.money_url = base;
        self
    }

    async fn fetch_list_page(&self, page: usize) -> Result<Vec<NodeRow>, ProviderError> {
        let url = format!(
            "{}/quotes_service/api/json_v2.php/Market_Center.getHQNodeData",
            self.vip_url
        );
        let query = [
            ("page", page.to_string()),
            ("num", PAGE_SIZE.to_string()),
            ("sort", "symbol".to_string()),
            ("asc", "1".to_string()),
            ("node", "hs_a".to_string()),
            ("symbol", String::new()),
            ("_s_r_a", "page".to_string()),
        ];
        let rows: Option<Vec<NodeRow>> = self.fetcher.get_json(&url, &query).await?;
        Ok(rows.unwrap_or_default())
    }

    async fn fetch_balance_sheet_year(
        &self,
        code: &str,
        year: i32,
    ) -> Result<HashMap<(NaiveDate, String), Option<f64>>, ProviderError> {
        let url = format!(
            "{}/corp/go.php/vFD_BalanceSheet/stockid/{}/ctrl/{}/displaytype/4.phtml",
            self.money_url, code, year
        );
        let html = self.fetcher.get_text(&url, &[], PageEncoding::Gbk).await?;
        parse_balance_sheet(&html)
    }
}

#[async_trait]
impl DataProvider for SinaAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::full().with_rate_limit(Some(60))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!(
            "{}/quotes_service/api/json_v2.php/Market_Center.getHQNodeCount",
            self.vip_url
        );
        self.fetcher
            .get_text(&url, &[("node", "hs_a".to_string())], PageEncoding::Declared)
            .await
            .map(|_| ())
    }

    async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
        let mut companies = Vec::new();

        for page in 1..=MAX_PAGES {
            let rows = match self.fetch_list_page(page).await {
                Ok(rows) => rows,
                Err(e) if !companies.is_empty() => {
                    warn!(page, error = %e, "Stock list page failed, keeping partial list");
                    break;
                }
                Err(e) => return Err(e),
            };
            if rows.is_empty() {
                break;
            }
            companies.extend(parse_node_rows(rows));
            debug!(page, fetched = companies.len(), "Fetched stock list page");
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
        let url = format!(
            "{}/corp/go.php/vCI_CorpOtherInfo/stockid/{}/menu_num/2.phtml",
            self.vip_url, code
        );
        let html = self.fetcher.get_text(&url, &[], PageEncoding::Gbk).await?;
        let industry = parse_industry_page(&html)?
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no industry board for {}", code)))?;
        Ok(IndustryClassification::from_raw_label(code, &industry, None, NAME))
    }

    async fn get_financials(
        &self,
        code: &str,
        periods: &[NaiveDate],
        subjects: &[String],
    ) -> Result<Vec<FinancialMetric>, ProviderError> {
        let years: BTreeSet<i32> = periods.iter().map(|p| p.year()).collect();
        let mut table = HashMap::new();
        for year in years {
            match self.fetch_balance_sheet_year(code, year).await {
                Ok(values) => table.extend(values),
                Err(ProviderError::DataNotAvailable(_)) => {
                    debug!(code, year, "No balance sheet published for year");
                }
                Err(e) => return Err(e),
            }
        }

        let mut metrics = Vec::with_capacity(periods.len() * subjects.len());
        for period in periods {
            for subject in subjects {
                let value = subject_label(subject)
                    .and_then(|label| table.get(&(*period, label.to_string())).copied())
                    .flatten();
                metrics.push(FinancialMetric::new(code, *period, subject.clone(), value, NAME));
            }
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_PAGE: &str = r#"
        <html><body>
        <table class="comInfo1"><tr><td>所属概念板块</td></tr><tr><td>x</td></tr><tr><td>深圳本地</td></tr></table>
        <table class="comInfo1">
          <tr><td class="ct">所属行业板块</td></tr>
          <tr><td>行业名称</td></tr>
          <tr><td> 房地产开发 </td></tr>
        </table>
        </body></html>"#;

    const BALANCE_PAGE: &str = r#"
        <table id="BalanceSheetNewTable0">
          <tr><td>报表日期</td><td>2024-12-31</td><td>2024-09-30</td></tr>
          <tr><td>流动资产</td><td></td><td></td></tr>
          <tr><td>投资性房地产</td><td>1,234.50</td><td>--</td></tr>
          <tr><td>资产总计</td><td>98,765.00</td><td>90,000.00</td></tr>
        </table>"#;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_industry_page() {
        let industry = parse_industry_page(PROFILE_PAGE).unwrap();
        assert_eq!(industry.as_deref(), Some("房地产开发"));
        assert_eq!(parse_industry_page("<html></html>").unwrap(), None);
    }

    #[test]
    fn test_parse_balance_sheet_scales_to_yuan() {
        let values = parse_balance_sheet(BALANCE_PAGE).unwrap();
        assert_eq!(
            values.get(&(date(2024, 12, 31), "投资性房地产".to_string())),
            Some(&Some(12_345_000.0))
        );
        assert_eq!(
            values.get(&(date(2024, 9, 30), "投资性房地产".to_string())),
            Some(&None)
        );
        assert_eq!(
            values.get(&(date(2024, 9, 30), "资产总计".to_string())),
            Some(&Some(900_000_000.0))
        );
    }

    #[test]
    fn test_parse_balance_sheet_missing_table() {
        let err = parse_balance_sheet("<html><body>维护中</body></html>").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn test_parse_node_rows() {
        let rows: Vec<NodeRow> = serde_json::from_str(
            r#"[{"symbol":"sh600000","code":"600000","name":"浦发银行"},
                {"symbol":"sz000002","code":"","name":"万 科Ａ"},
                {"symbol":"bad","code":"","name":"坏"}]"#,
        )
        .unwrap();
        let companies = parse_node_rows(rows);
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[1].code, "000002");
        assert_eq!(companies[1].name, "万 科Ａ");
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_live_industry() {
        let adapter = SinaAdapter::new(3, HttpFetcher::unpaced(NAME));
        let industry = adapter.get_industry("000002", None).await.unwrap();
        assert!(industry.level2.is_some());
    }
}
