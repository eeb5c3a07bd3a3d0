//! HTTP contract tests for the scanner client and the chart history provider.
//!
//! Both run against a local mock server; no external network is touched.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zone_common::config::{HistoryConfig, ScannerConfig};
use zone_engine::data::{ChartHistoryProvider, PriceHistoryProvider, ProviderError};
use zone_engine::scanner::{ScanSource, ScannerClient, ScannerError};

const SCAN_PATH: &str = "/screener/process";

fn scanner_for(server: &MockServer) -> ScannerClient {
    ScannerClient::from_config(&ScannerConfig {
        base_url: server.uri(),
        ..Default::default()
    })
}

fn homepage_with_token(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", format!("XSRF-TOKEN={}; path=/", token).as_str())
        .set_body_string("<html></html>")
}

fn scan_body() -> serde_json::Value {
    json!({
        "draw": 1,
        "data": [
            {"sr": 1, "nsecode": "INFY", "name": "Infosys", "close": 1450.5},
            {"sr": 2, "nsecode": "TCS", "name": "Tata Consultancy", "close": 3890.0}
        ]
    })
}

// ============================================================================
// Scanner Token Lifecycle
// ============================================================================

#[tokio::test]
async fn test_token_mismatch_refreshes_and_retries_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(homepage_with_token("fresh%3D%3D"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .and(header("X-XSRF-TOKEN", "stale"))
        .respond_with(ResponseTemplate::new(419))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .and(header("X-XSRF-TOKEN", "fresh=="))
        .and(body_string_contains("scan_clause="))
        .respond_with(ResponseTemplate::new(200).set_body_json(scan_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = scanner_for(&server).with_token("stale");
    let candidates = client.fetch_candidates("( close > 10 )").await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].symbol, "INFY");
    assert_eq!(candidates[1].last_close, 3890.0);
    assert_eq!(client.current_token().await.as_deref(), Some("fresh=="));
}

#[tokio::test]
async fn test_transport_failure_refreshes_and_retries_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(homepage_with_token("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    // Outlives the client timeout, so the first POST fails in transport
    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .and(header("X-XSRF-TOKEN", "stale"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(scan_body())
                .set_delay(Duration::from_secs(3)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .and(header("X-XSRF-TOKEN", "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scan_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ScannerClient::from_config(&ScannerConfig {
        base_url: server.uri(),
        timeout_secs: 1,
        ..Default::default()
    })
    .with_token("stale");

    let candidates = client.fetch_candidates("( close > 10 )").await.unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(client.current_token().await.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_missing_token_is_fetched_before_first_scan() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(homepage_with_token("first"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .and(header("X-XSRF-TOKEN", "first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scan_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = scanner_for(&server);
    client.fetch_candidates("( close > 10 )").await.unwrap();
    // Held token is reused
    client.fetch_candidates("( close > 10 )").await.unwrap();
}

#[tokio::test]
async fn test_homepage_without_cookie_is_token_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .respond_with(ResponseTemplate::new(419))
        .mount(&server)
        .await;

    let client = scanner_for(&server).with_token("stale");
    let err = client.fetch_candidates("( close > 10 )").await.unwrap_err();
    assert!(matches!(err, ScannerError::TokenNotFound));
}

#[tokio::test]
async fn test_second_mismatch_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(homepage_with_token("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .respond_with(ResponseTemplate::new(419))
        .expect(2)
        .mount(&server)
        .await;

    let client = scanner_for(&server).with_token("stale");
    let err = client.fetch_candidates("( close > 10 )").await.unwrap_err();
    assert!(err.is_token_mismatch());
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = scanner_for(&server).with_token("held");
    let err = client.fetch_candidates("( close > 10 )").await.unwrap_err();
    assert!(matches!(err, ScannerError::Status { code: 500 }));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SCAN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let client = scanner_for(&server).with_token("held");
    let err = client.fetch_candidates("( close > 10 )").await.unwrap_err();
    assert!(matches!(err, ScannerError::Decode(_)));
}

// ============================================================================
// Chart History Provider
// ============================================================================

fn history_for(server: &MockServer) -> ChartHistoryProvider {
    ChartHistoryProvider::from_config(&HistoryConfig {
        base_url: server.uri(),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_chart_history_newest_first() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/INFY.NS"))
        .and(query_param("interval", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": [{
                    "meta": {"gmtoffset": 19800},
                    "timestamp": [1715917500, 1716176700, 1716263100],
                    "indicators": {"quote": [{
                        "open":  [100.0, 101.0, 102.0],
                        "high":  [105.0, 106.0, 108.0],
                        "low":   [ 99.0, 100.0, 101.0],
                        "close": [104.0, 102.0, 107.0]
                    }]}
                }],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let candles = history_for(&server).fetch_history("INFY").await.unwrap();
    assert_eq!(candles.len(), 3);
    assert_eq!(candles[0].timestamp, "21 May 2024");
    assert_eq!(candles[2].timestamp, "17 May 2024");
    assert_eq!(candles[2].high, 105.0);
}

#[tokio::test]
async fn test_chart_history_status_mapping() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/GONE.NS"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/BUSY.NS"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider = history_for(&server);
    assert!(provider.fetch_history("GONE").await.unwrap().is_empty());
    assert!(matches!(
        provider.fetch_history("BUSY").await.unwrap_err(),
        ProviderError::RateLimited
    ));
}
