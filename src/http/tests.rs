//! Tests for the HTTP module

use super::client::parse_retry_after;
use super::*;
use crate::cancel::Cancellation;
use crate::error::{Error, ErrorKind, Result};
use crate::rate_limit::{
    BucketConfig, BucketStore, DistributedRateLimiter, LocalRateLimiter, RateLimiter,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
        .jitter(false)
        .build()
        .unwrap()
}

fn executor(server: &MockServer, limiter: Arc<dyn RateLimiter>, max_retries: u32) -> RateLimitedExecutor {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .retry(fast_retry(max_retries))
        .build();
    RateLimitedExecutor::new(config, limiter).unwrap()
}

fn roomy_limiter() -> Arc<dyn RateLimiter> {
    Arc::new(LocalRateLimiter::new(BucketConfig::new(100.0, 100.0).unwrap()))
}

#[test]
fn test_http_client_config_default() {
    let config = HttpClientConfig::default();
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.retry.max_retries(), 3);
    assert!(config.base_url.is_none());
    assert!(config.user_agent.starts_with("quote-sync/"));
}

#[test]
fn test_request_config_builder() {
    let config = RequestConfig::new()
        .query("code", "7203")
        .query("date", "20240105")
        .header("X-Request-Id", "abc123")
        .bearer("id-token")
        .json(serde_json::json!({"key": "value"}))
        .timeout(Duration::from_secs(10));

    assert_eq!(
        config.query,
        vec![
            ("code".to_string(), "7203".to_string()),
            ("date".to_string(), "20240105".to_string())
        ]
    );
    assert_eq!(config.headers.get("X-Request-Id"), Some(&"abc123".to_string()));
    assert_eq!(config.bearer.as_deref(), Some("id-token"));
    assert!(config.body.is_some());
    assert_eq!(config.timeout, Some(Duration::from_secs(10)));
}

#[test]
fn test_executor_narrows_retry_policy() {
    let config = HttpClientConfig::builder()
        .retry(
            RetryPolicy::builder()
                .retry_on([ErrorKind::Network, ErrorKind::Validation])
                .build()
                .unwrap(),
        )
        .build();
    let exec = RateLimitedExecutor::new(config, roomy_limiter()).unwrap();

    assert!(exec.retry_policy().is_retryable(&Error::from_status(500, "", None)));
    assert!(!exec.retry_policy().is_retryable(&Error::validation("x")));
    assert!(!exec.retry_policy().is_retryable(&Error::from_status(400, "", None)));
}

#[test]
fn test_parse_retry_after() {
    let mut headers = HeaderMap::new();
    assert_eq!(parse_retry_after(&headers), None);

    headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
    assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));

    headers.insert(RETRY_AFTER, HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
    assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));

    headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
    assert_eq!(parse_retry_after(&headers), None);

    headers.insert(RETRY_AFTER, HeaderValue::from_static("-1"));
    assert_eq!(parse_retry_after(&headers), None);
}

#[test]
fn test_parse_retry_after_ignores_unrepresentable_values() {
    let mut headers = HeaderMap::new();
    for value in ["1e30", "inf", "NaN"] {
        headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
        assert_eq!(parse_retry_after(&headers), None, "{value}");
    }
}

#[tokio::test]
async fn test_get_json_with_query_and_bearer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .and(query_param("code", "7203"))
        .and(header("Authorization", "Bearer id-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "info": [{"Code": "72030"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 0);
    let body: serde_json::Value = exec
        .get_json(
            "/listed/info",
            &RequestConfig::new().query("code", "7203").bearer("id-token"),
            &Cancellation::new(),
        )
        .await
        .unwrap();

    assert_eq!(body["info"][0]["Code"], "72030");
}

#[tokio::test]
async fn test_post_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/auth_user"))
        .and(body_json(serde_json::json!({"mailaddress": "a@b.c"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "refreshToken": "r"
        })))
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 0);
    let body: serde_json::Value = exec
        .post_json(
            "/token/auth_user",
            &RequestConfig::new().json(serde_json::json!({"mailaddress": "a@b.c"})),
            &Cancellation::new(),
        )
        .await
        .unwrap();
    assert_eq!(body["refreshToken"], "r");
}

#[tokio::test]
async fn test_retry_on_500_consumes_a_token_per_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prices/daily_quotes"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prices/daily_quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&mock_server)
        .await;

    let limiter: Arc<dyn RateLimiter> =
        Arc::new(LocalRateLimiter::new(BucketConfig::new(5.0, 0.001).unwrap()));
    let exec = executor(&mock_server, Arc::clone(&limiter), 3);

    let response = exec
        .request(
            Method::GET,
            "/prices/daily_quotes",
            &RequestConfig::new(),
            &Cancellation::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    // failed attempts are not refunded
    assert_eq!(limiter.remaining().await.unwrap(), 2);
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such code"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 3);
    let err = exec
        .request(Method::GET, "/listed/info", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap_err();

    match err {
        Error::Client { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such code");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 2);
    let err = exec
        .request(Method::GET, "/listed/info", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Server { status: 503, .. }));
}

#[tokio::test]
async fn test_429_retried_with_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"info": []})))
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 1);
    let response = exec
        .request(Method::GET, "/listed/info", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_huge_retry_after_falls_back_to_backoff() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1e30"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"info": []})))
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 1);
    let task = tokio::spawn(async move {
        exec.request(Method::GET, "/listed/info", &RequestConfig::new(), &Cancellation::new())
            .await
            .map(|response| response.status().as_u16())
    });

    let status = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("request should finish on the backoff delay")
        .expect("executor task should not panic")
        .unwrap();
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_request_counted_reports_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"info": []})))
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 3);
    let (result, attempts) = exec
        .request_json_counted::<serde_json::Value>(
            Method::GET,
            "/listed/info",
            &RequestConfig::new(),
            &Cancellation::new(),
        )
        .await;
    assert_eq!(result.unwrap(), serde_json::json!({"info": []}));
    assert_eq!(attempts, 3);

    let unrooted = RateLimitedExecutor::new(HttpClientConfig::default(), roomy_limiter()).unwrap();
    let (result, attempts) = unrooted
        .request_counted(Method::GET, "not a url", &RequestConfig::new(), &Cancellation::new())
        .await;
    assert!(result.is_err());
    assert_eq!(attempts, 0);
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 3);
    let err = exec
        .get_json::<serde_json::Value>("/listed/info", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Nothing listens on port 9 (discard) in the test environment
    let config = HttpClientConfig::builder()
        .base_url("http://127.0.0.1:9")
        .retry(fast_retry(1))
        .build();
    let exec = RateLimitedExecutor::new(config, roomy_limiter()).unwrap();

    let err = exec
        .request(Method::GET, "/listed/info", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[derive(Debug)]
struct DownStore;

#[async_trait]
impl BucketStore for DownStore {
    async fn take(
        &self,
        _key: &str,
        _config: &BucketConfig,
        _ttl: Duration,
        _consume: bool,
    ) -> Result<crate::rate_limit::BucketDecision> {
        Err(Error::limiter_unavailable("redis unreachable"))
    }
}

#[tokio::test]
async fn test_unavailable_limiter_blocks_the_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let limiter: Arc<dyn RateLimiter> = Arc::new(DistributedRateLimiter::new(
        Arc::new(DownStore),
        "jquants",
        "listed_info",
        BucketConfig::per_minute(60).unwrap(),
    ));
    let exec = executor(&mock_server, limiter, 3);

    let err = exec
        .request(Method::GET, "/listed/info", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimiterUnavailable);
}

#[tokio::test]
async fn test_cancellation_stops_slow_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/listed/info"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let exec = executor(&mock_server, roomy_limiter(), 3);
    let cancel = Cancellation::with_timeout(Duration::from_millis(100));

    let started = std::time::Instant::now();
    let err = exec
        .request(Method::GET, "/listed/info", &RequestConfig::new(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_invalid_url_is_config_error() {
    let exec = RateLimitedExecutor::new(HttpClientConfig::default(), roomy_limiter()).unwrap();
    let err = exec
        .request(Method::GET, "not a url", &RequestConfig::new(), &Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
