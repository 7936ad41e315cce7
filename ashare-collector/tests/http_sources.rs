//! HTTP adapters against a local mock server.
//!
//! Each test serves a captured-shape response and checks the parsed records,
//! request headers, and how HTTP failures map to provider errors.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ashare_collector::data::{
    CninfoAdapter, DataProvider, DataProviderRouter, EastmoneyAdapter, EastmoneyF10Adapter, HttpFetcher,
    Market, ProviderError, RouterConfig, SinaAdapter, TencentAdapter,
};
use common::date;

fn gbk(text: &str) -> Vec<u8> {
    let (bytes, _, _) = encoding_rs::GBK.encode(text);
    bytes.into_owned()
}

fn gbk_page(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(gbk(text), "text/html; charset=gbk")
}

fn eastmoney(server: &MockServer) -> EastmoneyAdapter {
    EastmoneyAdapter::new(1, HttpFetcher::unpaced("eastmoney")).with_base_url(server.uri())
}

// ============================================================================
// Eastmoney
// ============================================================================

#[tokio::test]
async fn test_eastmoney_stock_list_pages_until_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/clist/get"))
        .and(query_param("pn", "1"))
        .and(header_exists("accept-language"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rc": 0,
            "data": {
                "total": 3,
                "diff": [
                    {"f12": "600000", "f13": 1, "f14": "浦发银行", "f26": 19991110},
                    {"f12": "000002", "f13": 0, "f14": "万科Ａ", "f26": "-"}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/qt/clist/get"))
        .and(query_param("pn", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rc": 0,
            "data": {"total": 3, "diff": [{"f12": "300750", "f13": 0, "f14": "宁德时代", "f26": "20180611"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let companies = eastmoney(&server).get_stock_list().await.unwrap();

    assert_eq!(companies.len(), 3);
    assert_eq!(companies[0].code, "600000");
    assert_eq!(companies[0].market, Market::Shanghai);
    assert_eq!(companies[0].list_date, Some(date(1999, 11, 10)));
    assert_eq!(companies[1].list_date, None);
    assert_eq!(companies[2].list_date, Some(date(2018, 6, 11)));
    assert!(companies.iter().all(|c| c.source == "eastmoney"));
}

#[tokio::test]
async fn test_eastmoney_industry_from_quote() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/stock/get"))
        .and(query_param("secid", "1.600000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rc": 0,
            "data": {"f57": "600000", "f58": "浦发银行", "f127": "银行"}
        })))
        .mount(&server)
        .await;

    let industry = eastmoney(&server).get_industry("600000", None).await.unwrap();

    assert_eq!(industry.code, "600000");
    assert_eq!(industry.level1.as_deref(), Some("银行"));
    assert_eq!(industry.level2.as_deref(), Some("银行"));
    assert_eq!(industry.source, "eastmoney");
}

#[tokio::test]
async fn test_eastmoney_missing_board_is_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/stock/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rc": 0,
            "data": {"f57": "000002", "f58": "万科A", "f127": "-"}
        })))
        .mount(&server)
        .await;

    let err = eastmoney(&server).get_industry("000002", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::DataNotAvailable(_)));
}

// ============================================================================
// Eastmoney F10
// ============================================================================

#[tokio::test]
async fn test_f10_survey_industry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/PC_HSF10/CompanySurvey/CompanySurveyAjax"))
        .and(query_param("code", "SZ000002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jbzl": {"sshy": "房地产开发", "sszjhhy": "房地产业-房地产业"}
        })))
        .mount(&server)
        .await;

    let adapter = EastmoneyF10Adapter::new(2, HttpFetcher::unpaced("eastmoney_f10")).with_base_url(server.uri());
    let industry = adapter.get_industry("000002", Some("万科A")).await.unwrap();

    assert_eq!(industry.level2.as_deref(), Some("房地产开发"));
    assert_eq!(industry.level3.as_deref(), Some("房地产业"));
    assert!(industry.level1.is_some());
}

#[tokio::test]
async fn test_f10_balance_sheet_tries_company_types() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/PC_HSF10/NewFinanceAnalysis/zcfzbAjaxNew"))
        .and(query_param("companyType", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/PC_HSF10/NewFinanceAnalysis/zcfzbAjaxNew"))
        .and(query_param("companyType", "3"))
        .and(query_param("code", "SH600000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"REPORT_DATE": "2024-12-31 00:00:00", "INVEST_REALESTATE": 1.2e9, "CIP": null},
                {"REPORT_DATE": "2023-12-31 00:00:00", "INVEST_REALESTATE": "1.1e9", "CIP": 3.0e7}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = EastmoneyF10Adapter::new(2, HttpFetcher::unpaced("eastmoney_f10")).with_base_url(server.uri());
    let periods = [date(2023, 12, 31), date(2024, 12, 31)];
    let subjects = vec!["INVEST_REALESTATE".to_string(), "CIP".to_string()];
    let metrics = adapter.get_financials("600000", &periods, &subjects).await.unwrap();

    assert_eq!(metrics.len(), 4);
    let value = |period, subject: &str| {
        metrics
            .iter()
            .find(|m| m.period == period && m.subject == subject)
            .and_then(|m| m.value)
    };
    assert_eq!(value(date(2024, 12, 31), "INVEST_REALESTATE"), Some(1.2e9));
    assert_eq!(value(date(2024, 12, 31), "CIP"), None);
    assert_eq!(value(date(2023, 12, 31), "INVEST_REALESTATE"), Some(1.1e9));
    assert_eq!(value(date(2023, 12, 31), "CIP"), Some(3.0e7));
}

// ============================================================================
// Sina
// ============================================================================

#[tokio::test]
async fn test_sina_stock_list_stops_on_empty_page() {
    let server = MockServer::start().await;
    let list_path = "/quotes_service/api/json_v2.php/Market_Center.getHQNodeData";
    Mock::given(method("GET"))
        .and(path(list_path))
        .and(query_param("page", "1"))
        .and(query_param("node", "hs_a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"symbol": "sh600000", "code": "600000", "name": "浦发银行"},
            {"symbol": "bj830799", "code": "", "name": "艾融软件"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(list_path))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = SinaAdapter::new(3, HttpFetcher::unpaced("sina")).with_base_url(server.uri());
    let companies = adapter.get_stock_list().await.unwrap();

    let codes: Vec<&str> = companies.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, vec!["600000", "830799"]);
    assert_eq!(companies[1].market, Market::Beijing);
}

#[tokio::test]
async fn test_sina_industry_from_gbk_profile_page() {
    let server = MockServer::start().await;
    let page = r#"<html><head><meta charset="gb2312"></head><body>
        <table class="comInfo1">
          <tr><td class="ct">所属行业板块</td></tr>
          <tr><td>行业名称</td></tr>
          <tr><td>房地产开发</td></tr>
        </table></body></html>"#;
    Mock::given(method("GET"))
        .and(path("/corp/go.php/vCI_CorpOtherInfo/stockid/000002/menu_num/2.phtml"))
        .respond_with(gbk_page(page))
        .mount(&server)
        .await;

    let adapter = SinaAdapter::new(3, HttpFetcher::unpaced("sina")).with_base_url(server.uri());
    let industry = adapter.get_industry("000002", None).await.unwrap();

    assert_eq!(industry.level2.as_deref(), Some("房地产开发"));
    assert_eq!(industry.source, "sina");
}

#[tokio::test]
async fn test_sina_balance_sheet_in_yuan() {
    let server = MockServer::start().await;
    let page = r#"<html><body><table id="BalanceSheetNewTable0">
          <tr><td>报表日期</td><td>2024-12-31</td><td>2024-09-30</td></tr>
          <tr><td>投资性房地产</td><td>1,234.50</td><td>1,200.00</td></tr>
          <tr><td>在建工程</td><td>--</td><td>10.00</td></tr>
        </table></body></html>"#;
    Mock::given(method("GET"))
        .and(path("/corp/go.php/vFD_BalanceSheet/stockid/000002/ctrl/2024/displaytype/4.phtml"))
        .respond_with(gbk_page(page))
        .mount(&server)
        .await;

    let adapter = SinaAdapter::new(3, HttpFetcher::unpaced("sina")).with_base_url(server.uri());
    let subjects = vec!["INVEST_REALESTATE".to_string(), "CIP".to_string()];
    let metrics = adapter
        .get_financials("000002", &[date(2024, 12, 31)], &subjects)
        .await
        .unwrap();

    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].subject, "INVEST_REALESTATE");
    assert_eq!(metrics[0].value, Some(12_345_000.0));
    assert_eq!(metrics[1].value, None);
}

// ============================================================================
// Tencent
// ============================================================================

#[tokio::test]
async fn test_tencent_industry_from_gbk_quote() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/q=sz000002"))
        .respond_with(gbk_page("v_sz000002=\"51~万科Ａ~000002~7.50~行业：房地产开发~\";"))
        .mount(&server)
        .await;

    let adapter = TencentAdapter::new(4, HttpFetcher::unpaced("tencent")).with_base_url(server.uri());
    let industry = adapter.get_industry("000002", None).await.unwrap();

    assert_eq!(industry.level2.as_deref(), Some("房地产开发"));
    assert_eq!(industry.source, "tencent");
}

#[tokio::test]
async fn test_tencent_unknown_symbol_is_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/q=sh600000"))
        .respond_with(gbk_page("v_pv_none_match=\"1\";"))
        .mount(&server)
        .await;

    let adapter = TencentAdapter::new(4, HttpFetcher::unpaced("tencent")).with_base_url(server.uri());
    let err = adapter.get_industry("600000", None).await.unwrap_err();
    assert!(matches!(err, ProviderError::DataNotAvailable(_)));
}

// ============================================================================
// Cninfo
// ============================================================================

#[tokio::test]
async fn test_cninfo_dictionary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/new/data/szse_stock.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "\u{feff}{\"stockList\":[\
             {\"code\":\"000001\",\"zwjc\":\"平安银行\",\"category\":\"A股\"},\
             {\"code\":\"200011\",\"zwjc\":\"深物业B\",\"category\":\"B股\"}]}",
        ))
        .mount(&server)
        .await;

    let adapter = CninfoAdapter::new(5, HttpFetcher::unpaced("cninfo")).with_base_url(server.uri());
    let companies = adapter.get_stock_list().await.unwrap();

    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].name, "平安银行");
}

// ============================================================================
// HTTP Failures
// ============================================================================

async fn quote_error(status: u16, retry_after: Option<&str>) -> ProviderError {
    let server = MockServer::start().await;
    let mut response = ResponseTemplate::new(status);
    if let Some(secs) = retry_after {
        response = response.insert_header("Retry-After", secs);
    }
    Mock::given(method("GET"))
        .and(path("/api/qt/stock/get"))
        .respond_with(response)
        .mount(&server)
        .await;
    eastmoney(&server).get_industry("600000", None).await.unwrap_err()
}

#[tokio::test]
async fn test_http_status_mapping() {
    assert!(matches!(
        quote_error(429, Some("7")).await,
        ProviderError::RateLimited {
            retry_after_secs: Some(7)
        }
    ));
    assert!(matches!(quote_error(500, None).await, ProviderError::Unavailable(_)));
    assert!(matches!(quote_error(403, None).await, ProviderError::Auth(_)));
    assert!(matches!(quote_error(404, None).await, ProviderError::DataNotAvailable(_)));
}

#[tokio::test]
async fn test_malformed_json_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/new/data/szse_stock.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>blocked</html>"))
        .mount(&server)
        .await;

    let adapter = CninfoAdapter::new(5, HttpFetcher::unpaced("cninfo")).with_base_url(server.uri());
    let err = adapter.get_stock_list().await.unwrap_err();
    assert!(matches!(err, ProviderError::Parse(_)));
}

#[tokio::test]
async fn test_router_retries_then_fails_over_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/stock/get"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/q=sh600000"))
        .respond_with(gbk_page("v_sh600000=\"1~浦发银行~600000~行业：银行~\";"))
        .expect(1)
        .mount(&server)
        .await;

    let router = DataProviderRouter::with_config(RouterConfig {
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(5),
        ..Default::default()
    });
    router.register(Arc::new(eastmoney(&server))).await;
    router
        .register(Arc::new(
            TencentAdapter::new(4, HttpFetcher::unpaced("tencent")).with_base_url(server.uri()),
        ))
        .await;

    let results = router.gather_industry("600000", None, 3).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, "tencent");
    assert_eq!(results[0].data.level1.as_deref(), Some("银行"));

    let info = router.get_providers_info().await;
    let em = info.iter().find(|p| p.name == "eastmoney").unwrap();
    assert_eq!(em.request_count, 2);
    assert_eq!(em.success_count, 0);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_live_eastmoney_stock_list() {
    let adapter = EastmoneyAdapter::new(1, HttpFetcher::unpaced("eastmoney"));
    let companies = adapter.get_stock_list().await.unwrap();
    assert!(companies.len() > 4000);
}
