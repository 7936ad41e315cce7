//! Tencent quote adapter.
//!
//! The `qt.gtimg.cn` quote line is a `~`-separated GBK string. Some
//! quote variants carry an industry annotation, which is all this
//! source contributes.

use ashare_common::Config;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::http::{HttpFetcher, PageEncoding};
use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::{IndustryClassification, Market};
use crate::processing::cleaner::clean_text;

pub const NAME: &str = "tencent";

const DEFAULT_BASE_URL: &str = "https://qt.gtimg.cn";

static INDUSTRY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"行业[:：]\s*([^~;"\n]{2,20})"#).expect("industry pattern is valid"));

/// Quote symbol, e.g. "sh600000".
fn quote_symbol(code: &str) -> Option<String> {
    let prefix = Market::from_code(code).prefix()?;
    Some(format!("{}{}", prefix, code))
}

fn parse_industry(body: &str) -> Option<String> {
    INDUSTRY_PATTERN
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| clean_text(m.as_str()))
}

pub struct TencentAdapter {
    fetcher: HttpFetcher,
    base_url: String,
    priority: u8,
}

impl TencentAdapter {
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
            .with_referer("https://gu.qq.com/");
        Some(Self::new(source.priority, fetcher))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<String, ProviderError> {
        let url = format!("{}/q={}", self.base_url, symbol);
        let body = self.fetcher.get_text(&url, &[], PageEncoding::Gbk).await?;
        if body.contains("v_pv_none_match") {
            return Err(ProviderError::DataNotAvailable(format!("unknown symbol {}", symbol)));
        }
        Ok(body)
    }
}

#[async_trait]
impl DataProvider for TencentAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities {
            industry: true,
            rate_limit_rpm: Some(120),
            ..Default::default()
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.fetch_quote("sz000001").await.map(|_| ())
    }

    async fn get_industry(
        &self,
        code: &str,
        _name: Option<&str>,
    ) -> Result<IndustryClassification, ProviderError> {
        let symbol = quote_symbol(code)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown market for {}", code)))?;
        let body = self.fetch_quote(&symbol).await?;
        let industry = parse_industry(&body)
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no industry in quote for {}", code)))?;
        Ok(IndustryClassification::from_raw_label(code, &industry, None, NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_symbol() {
        assert_eq!(quote_symbol("600000").as_deref(), Some("sh600000"));
        assert_eq!(quote_symbol("300750").as_deref(), Some("sz300750"));
        assert_eq!(quote_symbol("830799").as_deref(), Some("bj830799"));
    }

    #[test]
    fn test_parse_industry() {
        let body = "v_sz000002=\"51~万科Ａ~000002~7.50~行业：房地产开发~\";";
        assert_eq!(parse_industry(body).as_deref(), Some("房地产开发"));

        let body = "v_sh600000=\"1~浦发银行~600000~行业: 银行\";";
        assert_eq!(parse_industry(body).as_deref(), Some("银行"));

        assert_eq!(parse_industry("v_sh600000=\"1~浦发银行~600000\";"), None);
    }
}
