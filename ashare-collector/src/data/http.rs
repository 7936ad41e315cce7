//! Shared HTTP plumbing for the web sources.
//!
//! Each adapter owns one `HttpFetcher`, which carries its own pacing so
//! that one slow source never holds back another.

use ashare_common::RequestConfig;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::ProviderError;
use super::rate_limiter::RequestPacer;
use super::user_agent::UserAgentPool;

/// How a response body is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEncoding {
    /// Charset declared by the response (UTF-8 when absent)
    Declared,
    /// GBK/GB2312 pages regardless of the declared charset
    Gbk,
}

/// Paced, identity-rotating HTTP client for one source.
#[derive(Debug)]
pub struct HttpFetcher {
    name: &'static str,
    client: reqwest::Client,
    user_agents: UserAgentPool,
    pacer: RequestPacer,
    referer: Option<String>,
}

impl HttpFetcher {
    pub fn new(name: &'static str, request: &RequestConfig, rate_limit_rpm: Option<u32>) -> Self {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(request.timeout_secs))
            .gzip(true);

        if let Some(proxy_url) = &request.proxy {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => warn!(provider = name, error = %e, "Ignoring invalid proxy URL"),
            }
        }

        let client = builder.build().unwrap_or_else(|e| {
            warn!(provider = name, error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        });

        let pacer = RequestPacer::new(
            name,
            Duration::from_millis(request.min_delay_ms),
            Duration::from_millis(request.max_delay_ms),
        )
        .with_rate_limit(rate_limit_rpm);

        Self {
            name,
            client,
            user_agents: UserAgentPool::new(&request.user_agents),
            pacer,
            referer: None,
        }
    }

    /// A fetcher without pacing, for local endpoints and tests.
    pub fn unpaced(name: &'static str) -> Self {
        let request = RequestConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            timeout_secs: 10,
            ..Default::default()
        };
        Self::new(name, &request, None)
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(self.user_agents.next()) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        if let Some(referer) = self.referer.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(REFERER, referer);
        }
        headers
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ProviderError> {
        self.pacer.wait().await;
        debug!(provider = self.name, url, "GET");

        let response = self
            .client
            .get(url)
            .headers(self.headers())
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network(format!("timeout: {}", e))
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(map_status(status, retry_after));
        }

        Ok(response)
    }

    /// GET a page and decode its body.
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        encoding: PageEncoding,
    ) -> Result<String, ProviderError> {
        let response = self.send(url, query).await?;
        match encoding {
            PageEncoding::Declared => response
                .text()
                .await
                .map_err(|e| ProviderError::Network(e.to_string())),
            PageEncoding::Gbk => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| ProviderError::Network(e.to_string()))?;
                Ok(decode_gbk(&bytes))
            }
        }
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let body = self.get_text(url, query, PageEncoding::Declared).await?;
        parse_json(&body)
    }
}

/// Decode a GBK page. Malformed sequences become U+FFFD.
pub fn decode_gbk(bytes: &[u8]) -> String {
    let (text, _, had_errors) = encoding_rs::GBK.decode(bytes);
    if had_errors {
        debug!("GBK page contained malformed sequences");
    }
    text.into_owned()
}

/// Parse a JSON body, tolerating a BOM and surrounding whitespace.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    serde_json::from_str(trimmed).map_err(|e| {
        let snippet: String = trimmed.chars().take(80).collect();
        ProviderError::Parse(format!("{} (body starts with {:?})", e, snippet))
    })
}

/// Map a non-success status to a provider error.
pub fn map_status(status: StatusCode, retry_after_secs: Option<u64>) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_secs },
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            ProviderError::Auth(format!("HTTP {}", status))
        }
        StatusCode::NOT_FOUND => ProviderError::DataNotAvailable(format!("HTTP {}", status)),
        s if s.is_server_error() => ProviderError::Unavailable(format!("HTTP {}", status)),
        s => ProviderError::Network(format!("HTTP {}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_map_status() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, Some(12)),
            ProviderError::RateLimited { retry_after_secs: Some(12) }
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, None),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, None),
            ProviderError::DataNotAvailable(_)
        ));
        assert!(matches!(map_status(StatusCode::FORBIDDEN, None), ProviderError::Auth(_)));
        assert!(matches!(map_status(StatusCode::IM_A_TEAPOT, None), ProviderError::Network(_)));
    }

    #[test]
    fn test_decode_gbk() {
        let (encoded, _, _) = encoding_rs::GBK.encode("所属行业板块");
        assert_eq!(decode_gbk(&encoded), "所属行业板块");
    }

    #[test]
    fn test_parse_json_with_bom() {
        #[derive(Debug, Deserialize)]
        struct Body {
            rc: i32,
        }
        let body: Body = parse_json("\u{feff}  {\"rc\": 0}\n").unwrap();
        assert_eq!(body.rc, 0);

        let err = parse_json::<Body>("<html>blocked</html>").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert!(err.to_string().contains("<html>"));
    }
}
