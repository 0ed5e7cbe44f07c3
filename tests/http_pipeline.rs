use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_guard::{
    AppState,
    cache::MemoryCounterStore,
    clock::{Clock, ManualClock},
    config::Config,
    infrastructure::{StaticApiKeyStore, TokenConfig, TokenService},
    middleware::{RateLimitPolicy, RateLimiter},
    notification::{MAX_MULTICAST_TOKENS, NotificationContent, NotificationError, PushSender},
    router::{RouteLimiters, create_router},
};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

const API_KEY: &str = "login-service-key";

struct EchoSender;

#[async_trait]
impl PushSender for EchoSender {
    async fn send(
        &self,
        _content: &NotificationContent,
        device_token: &str,
    ) -> Result<String, NotificationError> {
        Ok(format!("projects/test/messages/{}", device_token))
    }
}

struct Harness {
    router: Router,
    clock: ManualClock,
}

fn config() -> Config {
    let env: HashMap<&str, &str> = HashMap::from([
        ("JWT_SECRET", "s3cr3t-s3cr3t-s3cr3t-s3cr3t"),
        ("JWT_ISSUER", "api"),
        ("JWT_AUDIENCE", "clients"),
        ("JWT_LIFETIME_HOURS", "1"),
        ("API_BASE_URI", "/api"),
    ]);
    Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap()
}

fn harness(with_notifier: bool) -> Harness {
    let config = config();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());

    let tokens = TokenService::new(TokenConfig::from(&config), Arc::new(clock.clone())).unwrap();
    let store = Arc::new(MemoryCounterStore::with_clock(Arc::new(clock.clone())));

    let limiters = RouteLimiters {
        token: Arc::new(RateLimiter::with_clock(
            store.clone(),
            RateLimitPolicy::api_key(5, Duration::from_secs(100)),
            Arc::new(clock.clone()),
        )
        .unwrap()),
        user: Arc::new(RateLimiter::with_clock(
            store,
            RateLimitPolicy::client_ip(3, Duration::from_secs(60), false),
            Arc::new(clock.clone()),
        )
        .unwrap()),
    };

    let notifier: Option<Arc<dyn PushSender>> = if with_notifier {
        Some(Arc::new(EchoSender))
    } else {
        None
    };

    let state = AppState {
        config: Arc::new(config),
        tokens: Arc::new(tokens),
        api_keys: Arc::new(StaticApiKeyStore::new([("login-service", API_KEY)])),
        notifier,
    };

    Harness {
        router: create_router(state, limiters),
        clock,
    }
}

fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(format!("{}:40000", ip).parse().unwrap())
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, retry_after, body)
}

fn issue_request(api_key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/auth/token")
        .header(header::CONTENT_TYPE, "application/json")
        .extension(peer("10.0.0.1"));
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn me_request(ip: Option<&str>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/api/users/me");
    if let Some(ip) = ip {
        builder = builder.extension(peer(ip));
    }
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn issue(router: &Router, username: &str, user_id: &str) -> String {
    let (status, _, body) = send(
        router,
        issue_request(
            Some(API_KEY),
            json!({ "username": username, "user_id": user_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["resp_data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn issued_token_authenticates_request() {
    let h = harness(false);
    let token = issue(&h.router, "alice", "42").await;

    let (status, _, body) = send(&h.router, me_request(Some("10.0.0.1"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["resp_data"]["user_id"], "42");
    assert_eq!(body["resp_data"]["username"], "alice");
}

#[tokio::test]
async fn issue_response_reports_expiry() {
    let h = harness(false);
    let (status, _, body) = send(
        &h.router,
        issue_request(Some(API_KEY), json!({ "username": "alice", "user_id": "42" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["token_type"], "Bearer");
    assert_eq!(
        body["resp_data"]["expires_at"],
        h.clock.now().timestamp() + 3600
    );
}

#[tokio::test]
async fn token_issuance_requires_api_key() {
    let h = harness(false);
    let (status, _, body) = send(
        &h.router,
        issue_request(None, json!({ "username": "alice", "user_id": "42" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "key_unresolvable");
}

#[tokio::test]
async fn unknown_api_key_rejected() {
    let h = harness(false);
    let (status, _, body) = send(
        &h.router,
        issue_request(
            Some("not-a-real-key"),
            json!({ "username": "alice", "user_id": "42" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "api_key_rejected");
}

#[tokio::test]
async fn empty_username_is_bad_request() {
    let h = harness(false);
    let (status, _, body) = send(
        &h.router,
        issue_request(Some(API_KEY), json!({ "username": "", "user_id": "42" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_claims");
}

#[tokio::test]
async fn api_key_rate_limit_applies_per_key() {
    let h = harness(false);
    for _ in 0..5 {
        issue(&h.router, "alice", "42").await;
    }

    let (status, retry_after, body) = send(
        &h.router,
        issue_request(Some(API_KEY), json!({ "username": "alice", "user_id": "42" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(retry_after.as_deref(), Some("100"));
    assert_eq!(body["reason"], "rate_limit_exceeded");

    // 未知 key 有自己的计数，仍然走到 API key 校验
    let (status, _, body) = send(
        &h.router,
        issue_request(Some("other"), json!({ "username": "alice", "user_id": "42" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "api_key_rejected");
}

#[tokio::test]
async fn missing_bearer_token_rejected() {
    let h = harness(false);
    let (status, _, body) = send(&h.router, me_request(Some("10.0.0.1"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "missing_token");
}

#[tokio::test]
async fn expired_token_reports_token_expired() {
    let h = harness(false);
    let token = issue(&h.router, "alice", "42").await;

    h.clock.advance(chrono::Duration::seconds(3601));
    let (status, _, body) = send(&h.router, me_request(Some("10.0.0.2"), Some(&token))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "token_expired");
}

#[tokio::test]
async fn garbage_token_rejected() {
    let h = harness(false);
    let (status, _, body) = send(
        &h.router,
        me_request(Some("10.0.0.1"), Some("definitely.not.ajwt")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_ne!(body["reason"], "token_expired");
}

#[tokio::test]
async fn ip_rate_limit_runs_before_authentication() {
    let h = harness(false);

    for _ in 0..3 {
        let (status, _, _) = send(&h.router, me_request(Some("10.0.0.9"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let token = issue(&h.router, "alice", "42").await;
    let (status, retry_after, _) =
        send(&h.router, me_request(Some("10.0.0.9"), Some(&token))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(retry_after.as_deref(), Some("60"));

    // 其他 IP 不受影响
    let (status, _, _) = send(&h.router, me_request(Some("10.0.0.10"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    // 窗口结束后重新计数
    h.clock.advance(chrono::Duration::seconds(60));
    let (status, _, _) = send(&h.router, me_request(Some("10.0.0.9"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_source_address_rejected() {
    let h = harness(false);
    let token = issue(&h.router, "alice", "42").await;

    let (status, _, body) = send(&h.router, me_request(None, Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "key_unresolvable");
}

#[tokio::test]
async fn notification_routes_absent_without_sender() {
    let h = harness(false);
    let token = issue(&h.router, "alice", "42").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/notifications/send")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "t", "body": "b", "token": "device" }).to_string(),
        ))
        .unwrap();
    let (status, _, _) = send(&h.router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notification_requires_authentication() {
    let h = harness(true);
    let req = Request::builder()
        .method("POST")
        .uri("/api/notifications/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "t", "body": "b", "token": "device" }).to_string(),
        ))
        .unwrap();
    let (status, _, _) = send(&h.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn notification_sent_for_authenticated_user() {
    let h = harness(true);
    let token = issue(&h.router, "alice", "42").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/notifications/send")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "t", "body": "b", "token": "device-7" }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&h.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["resp_data"]["message_id"],
        "projects/test/messages/device-7"
    );
}

#[tokio::test]
async fn invalid_notification_is_bad_request() {
    let h = harness(true);
    let token = issue(&h.router, "alice", "42").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/notifications/send-batch")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "t", "body": "b", "tokens": [] }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&h.router, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_notification");
}

#[tokio::test]
async fn batch_notification_reports_counts() {
    let h = harness(true);
    let token = issue(&h.router, "alice", "42").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/notifications/send-batch")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "t", "body": "b", "tokens": ["a", "b"] }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&h.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["success_count"], 2);
    assert_eq!(body["resp_data"]["failure_count"], 0);
}

#[tokio::test]
async fn oversized_batch_rejected_before_sending() {
    let h = harness(true);
    let token = issue(&h.router, "alice", "42").await;
    let tokens: Vec<String> = (0..=MAX_MULTICAST_TOKENS)
        .map(|i| format!("device-{i}"))
        .collect();

    let req = Request::builder()
        .method("POST")
        .uri("/api/notifications/send-batch")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "t", "body": "b", "tokens": tokens }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&h.router, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_notification");
}
