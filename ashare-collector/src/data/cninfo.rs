//! CNINFO (巨潮资讯) adapter.
//!
//! Serves the stock list from the static `szse_stock.json` dictionary used
//! by the disclosure search box. No listing dates are published there.

use ashare_common::Config;
use async_trait::async_trait;
use serde::Deserialize;

use super::http::HttpFetcher;
use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::ListedCompany;
use crate::processing::cleaner::{clean_text, normalize_code};

pub const NAME: &str = "cninfo";

const DEFAULT_BASE_URL: &str = "https://www.cninfo.com.cn";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockDictionary {
    #[serde(default)]
    stock_list: Vec<DictionaryEntry>,
}

#[derive(Debug, Deserialize)]
struct DictionaryEntry {
    #[serde(default)]
    code: String,
    /// Short Chinese name
    #[serde(default)]
    zwjc: String,
    #[serde(default)]
    category: String,
}

fn parse_dictionary(dictionary: StockDictionary) -> Vec<ListedCompany> {
    dictionary
        .stock_list
        .into_iter()
        .filter(|e| e.category.is_empty() || e.category == "A股")
        .filter_map(|e| {
            let code = normalize_code(&e.code)?;
            let name = clean_text(&e.zwjc)?;
            Some(ListedCompany::new(code, name, NAME))
        })
        .collect()
}

pub struct CninfoAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    priority: u8,
}

impl CninfoAdapter {
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
            .with_referer("https://www.cninfo.com.cn/new/index");
        Some(Self::new(source.priority, fetcher))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_dictionary(&self) -> Result<StockDictionary, ProviderError> {
        let url = format!("{}/new/data/szse_stock.json", self.base_url);
        self.fetcher.get_json(&url, &[]).await
    }
}

#[async_trait]
impl DataProvider for CninfoAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            stock_list: true,
            rate_limit_rpm: Some(30),
            ..Default::default()
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.fetch_dictionary().await.map(|_| ())
    }

    async fn get_stock_list(&self) -> Result<Vec<ListedCompany>, ProviderError> {
        let companies = parse_dictionary(self.fetch_dictionary().await?);
        if companies.is_empty() {
            return Err(ProviderError::DataNotAvailable("empty stock dictionary".into()));
        }
        Ok(companies)
    }
}
