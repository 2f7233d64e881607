//! Tests for the auth module

use super::*;
use crate::cancel::Cancellation;
use crate::error::{Error, ErrorKind};
use crate::http::{HttpClientConfig, RateLimitedExecutor};
use crate::rate_limit::{BucketConfig, LocalRateLimiter};
use crate::retry::RetryPolicy;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor(server: &MockServer) -> RateLimitedExecutor {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .retry(
            RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(20))
                .jitter(false)
                .build()
                .unwrap(),
        )
        .build();
    let limiter = Arc::new(LocalRateLimiter::new(BucketConfig::new(100.0, 100.0).unwrap()));
    RateLimitedExecutor::new(config, limiter).unwrap()
}

fn login_service(server: &MockServer) -> AuthService {
    AuthService::new(
        executor(server),
        AuthConfig::with_login("acct-1", "me@example.com", "secret"),
    )
}

async fn mount_auth_user(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/token/auth_user"))
        .and(body_json(serde_json::json!({
            "mailaddress": "me@example.com",
            "password": "secret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "refreshToken": token
        })))
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_auth_refresh(server: &MockServer, refresh: &str, id_token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/token/auth_refresh"))
        .and(query_param("refreshtoken", refresh))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "idToken": id_token
        })))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_chain_from_login() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "refresh-1", 1).await;
    mount_auth_refresh(&mock_server, "refresh-1", "id-1", 1).await;

    let auth = login_service(&mock_server);
    assert_eq!(auth.state_name().await, "no_credential");

    let token = auth.get_access_token(&Cancellation::new()).await.unwrap();
    assert_eq!(token, "id-1");
    assert_eq!(auth.state_name().await, "has_access_token");

    let state = auth.state().await;
    let access = state.access().unwrap();
    assert_eq!(access.kind, CredentialKind::Access);
    assert_eq!(access.owner_id, "acct-1");
    // default access lifetime applies when the issuer omits an expiry
    assert!(access.expires_at > Utc::now() + chrono::Duration::hours(23));
}

#[tokio::test]
async fn test_cached_token_reused() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "refresh-1", 1).await;
    mount_auth_refresh(&mock_server, "refresh-1", "id-1", 1).await;

    let auth = login_service(&mock_server);
    let cancel = Cancellation::new();
    for _ in 0..3 {
        assert_eq!(auth.get_access_token(&cancel).await.unwrap(), "id-1");
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_one_renewal() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "refresh-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/token/auth_refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"idToken": "id-1"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = Arc::new(login_service(&mock_server));
    let cancel = Cancellation::new();

    let calls = (0..10).map(|_| {
        let auth = Arc::clone(&auth);
        let cancel = cancel.clone();
        tokio::spawn(async move { auth.get_access_token(&cancel).await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap(), "id-1");
    }
}

#[tokio::test]
async fn test_expiring_access_token_is_renewed() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "refresh-1", 1).await;

    // First exchange hands out a token with four minutes left
    let soon = (Utc::now() + chrono::Duration::minutes(4)).to_rfc3339();
    Mock::given(method("POST"))
        .and(path("/token/auth_refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "idToken": "id-short",
            "expires_at": soon
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_auth_refresh(&mock_server, "refresh-1", "id-fresh", 1).await;

    let auth = login_service(&mock_server);
    let cancel = Cancellation::new();

    // The short token is handed back once, as issued
    assert_eq!(auth.get_access_token(&cancel).await.unwrap(), "id-short");
    // ...but it is inside the five-minute buffer, so the next call renews it
    assert_eq!(auth.get_access_token(&cancel).await.unwrap(), "id-fresh");
}

#[tokio::test]
async fn test_token_with_six_minutes_left_is_reused() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "refresh-1", 1).await;

    let later = (Utc::now() + chrono::Duration::minutes(6)).to_rfc3339();
    Mock::given(method("POST"))
        .and(path("/token/auth_refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "idToken": "id-1",
            "expires_at": later
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = login_service(&mock_server);
    let cancel = Cancellation::new();
    assert_eq!(auth.get_access_token(&cancel).await.unwrap(), "id-1");
    assert_eq!(auth.get_access_token(&cancel).await.unwrap(), "id-1");
}

#[tokio::test]
async fn test_seed_refresh_token_skips_login() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "unused", 0).await;
    mount_auth_refresh(&mock_server, "seeded", "id-1", 1).await;

    let auth = AuthService::new(
        executor(&mock_server),
        AuthConfig::with_refresh_token("acct-1", "seeded"),
    );
    assert_eq!(auth.state_name().await, "has_refresh_token");
    assert_eq!(
        auth.get_access_token(&Cancellation::new()).await.unwrap(),
        "id-1"
    );
}

#[tokio::test]
async fn test_clear_tokens_forces_reissue() {
    let mock_server = MockServer::start().await;
    mount_auth_user(&mock_server, "refresh-1", 2).await;
    mount_auth_refresh(&mock_server, "refresh-1", "id-1", 2).await;

    let auth = login_service(&mock_server);
    let cancel = Cancellation::new();

    auth.get_access_token(&cancel).await.unwrap();
    auth.clear_tokens().await;
    assert_eq!(auth.state_name().await, "no_credential");

    auth.get_access_token(&cancel).await.unwrap();
    assert_eq!(auth.state_name().await, "has_access_token");
}

#[tokio::test]
async fn test_rejected_refresh_token_is_reacquired_once() {
    let mock_server = MockServer::start().await;

    let mut config = AuthConfig::with_login("acct-1", "me@example.com", "secret");
    config.refresh_token = Some("revoked".to_string());

    Mock::given(method("POST"))
        .and(path("/token/auth_refresh"))
        .and(query_param("refreshtoken", "revoked"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid refresh token"))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_auth_user(&mock_server, "refresh-2", 1).await;
    mount_auth_refresh(&mock_server, "refresh-2", "id-2", 1).await;

    let auth = AuthService::new(executor(&mock_server), config);
    assert_eq!(
        auth.get_access_token(&Cancellation::new()).await.unwrap(),
        "id-2"
    );
}

#[tokio::test]
async fn test_bad_credentials_are_authentication_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/auth_user"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad password"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let auth = login_service(&mock_server);
    let err = auth
        .get_access_token(&Cancellation::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    let cause = std::error::Error::source(&err).unwrap();
    assert!(cause.to_string().contains("bad password"));
    assert_eq!(auth.state_name().await, "no_credential");
}

#[tokio::test]
async fn test_issuer_outage_is_authentication_error_with_cause() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/auth_user"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let auth = login_service(&mock_server);
    let err = auth
        .get_access_token(&Cancellation::new())
        .await
        .unwrap_err();

    match err {
        Error::Auth {
            source: Some(cause),
            ..
        } => assert_eq!(cause.kind(), ErrorKind::Server),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_token_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/auth_user"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"refreshToken": ""})),
        )
        .mount(&mock_server)
        .await;

    let auth = login_service(&mock_server);
    let err = auth
        .get_access_token(&Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_no_credentials_configured() {
    let mock_server = MockServer::start().await;
    let auth = AuthService::new(executor(&mock_server), AuthConfig::default());

    let err = auth
        .get_access_token(&Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_cancellation_passes_through() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/auth_user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"refreshToken": "r"}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let auth = login_service(&mock_server);
    let err = auth
        .get_access_token(&Cancellation::with_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
