//! End-to-end pipeline tests against a mock upstream.
//!
//! The `HttpClient` port is replaced with a counting fake so tests can assert
//! not only on status codes but on whether the upstream was reached at all.

use std::{
    io::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body;
use gatehouse::{
    adapters::HttpHandler,
    config::ConfigStore,
    core::{CidrCache, RateLimiterRegistry, ResponseCache, UserAgentNormalizer},
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};
use hyper::{Request, Response, StatusCode};
use tempfile::NamedTempFile;

struct MockUpstream {
    calls: AtomicUsize,
    fail: bool,
}

impl MockUpstream {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for MockUpstream {
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(HttpClientError::ConnectionError(
                "connection refused".to_string(),
            ));
        }

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("X-Upstream-Path", req.uri().path())
            .body(Body::from("upstream says hello"))
            .unwrap())
    }
}

async fn handler_for(config_yaml: &str, upstream: Arc<MockUpstream>) -> (HttpHandler, NamedTempFile) {
    let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
    write!(file, "{config_yaml}").unwrap();
    file.as_file_mut().sync_all().unwrap();

    let store = ConfigStore::bootstrap(file.path()).await.unwrap();
    let client: Arc<dyn HttpClient> = upstream;
    let handler = HttpHandler::new(
        store,
        client,
        Arc::new(CidrCache::new()),
        Arc::new(UserAgentNormalizer::new()),
        Arc::new(RateLimiterRegistry::new()),
        Arc::new(ResponseCache::new()),
    );

    (handler, file)
}

fn peer() -> Option<SocketAddr> {
    Some("127.0.0.1:55555".parse().unwrap())
}

fn request(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("User-Agent", "gatehouse-tests/1.0")
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

fn request_from(path: &str, client_ip: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("User-Agent", "gatehouse-tests/1.0")
        .header("X-Forwarded-For", client_ip)
        .body(Body::empty())
        .unwrap()
}

fn request_with_ua(path: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("User-Agent", user_agent)
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

const PLAIN_SERVICE: &str = r#"
services:
  orders:
    url: "http://upstream.test:8080"
"#;

#[tokio::test]
async fn unknown_service_is_404_and_never_reaches_upstream() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(PLAIN_SERVICE, upstream.clone()).await;

    let response = handler
        .handle_request(request("/ghost/api"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn known_service_forwards_path_remainder() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(PLAIN_SERVICE, upstream.clone()).await;

    let response = handler
        .handle_request(request("/orders/api/v1/list?page=2"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 1);
    assert_eq!(
        response.headers().get("X-Upstream-Path").unwrap(),
        "/api/v1/list"
    );
}

#[tokio::test]
async fn blocklisted_ip_is_403_regardless_of_allowlist() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    ip_blocklist:
      - "10.0.0.0/8"
    ip_allowlist:
      - "10.1.2.3"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    let response = handler
        .handle_request(request_from("/orders/api", "10.1.2.3"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn allowlist_restricts_to_listed_ips() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    ip_allowlist:
      - "1.2.3.4"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    let rejected = handler
        .handle_request(request_from("/orders/api", "9.9.9.9"), peer())
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.call_count(), 0);

    let admitted = handler
        .handle_request(request_from("/orders/api", "1.2.3.4"), peer())
        .await
        .unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn global_blocklist_applies_to_every_service() {
    let config = r#"
global:
  ip_blocklist:
    - "192.0.2.0/24"
services:
  orders:
    url: "http://upstream.test:8080"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    let response = handler
        .handle_request(request_from("/orders/api", "192.0.2.99"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn unparsable_client_ip_is_400() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(PLAIN_SERVICE, upstream.clone()).await;

    let response = handler
        .handle_request(request_from("/orders/api", "not-an-address"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn missing_user_agent_is_403() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(PLAIN_SERVICE, upstream.clone()).await;

    let req = Request::builder()
        .method("GET")
        .uri("/orders/api")
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::empty())
        .unwrap();

    let response = handler.handle_request(req, peer()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn ua_blocklist_matches_substring_case_insensitively() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    user_agent_blocklist:
      - "bot"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    let blocked = handler
        .handle_request(request_with_ua("/orders/api", "Evilbot/1.0"), peer())
        .await
        .unwrap();
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);

    let admitted = handler
        .handle_request(request_with_ua("/orders/api", "Chrome/120.0"), peer())
        .await
        .unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn ua_allowlist_rejects_unlisted_agents() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    user_agent_allowlist:
      - "chrome"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    let rejected = handler
        .handle_request(request_with_ua("/orders/api", "Safari/1.0"), peer())
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.call_count(), 0);

    let admitted = handler
        .handle_request(request_with_ua("/orders/api", "Chrome/120.0"), peer())
        .await
        .unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
}

const AUTH_SERVICE: &str = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    auth:
      enabled: true
      header_name: "X-Api-Key"
      value: "secret"
"#;

#[tokio::test]
async fn missing_api_key_is_401() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(AUTH_SERVICE, upstream.clone()).await;

    let response = handler
        .handle_request(request("/orders/api"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn wrong_api_key_is_403() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(AUTH_SERVICE, upstream.clone()).await;

    let mut req = request("/orders/api");
    req.headers_mut()
        .insert("X-Api-Key", "wrong".parse().unwrap());

    let response = handler.handle_request(req, peer()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn correct_api_key_passes_through() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(AUTH_SERVICE, upstream.clone()).await;

    let mut req = request("/orders/api");
    req.headers_mut()
        .insert("X-Api-Key", "secret".parse().unwrap());

    let response = handler.handle_request(req, peer()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn rate_limit_caps_requests_within_a_window() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    rate_limit:
      enabled: true
      max_requests: 2
      period: "200ms"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    for _ in 0..2 {
        let response = handler
            .handle_request(request("/orders/api"), peer())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let limited = handler
        .handle_request(request("/orders/api"), peer())
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key("Retry-After"));
    assert_eq!(upstream.call_count(), 2);

    // A fresh window admits again once the original one has elapsed.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let response = handler
        .handle_request(request("/orders/api"), peer())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 3);
}

#[tokio::test]
async fn rate_limit_is_per_client_ip() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    rate_limit:
      enabled: true
      max_requests: 1
      period: "10s"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    let first = handler
        .handle_request(request_from("/orders/api", "203.0.113.7"), peer())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let other_client = handler
        .handle_request(request_from("/orders/api", "203.0.113.8"), peer())
        .await
        .unwrap();
    assert_eq!(other_client.status(), StatusCode::OK);

    let limited = handler
        .handle_request(request_from("/orders/api", "203.0.113.7"), peer())
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn cached_get_reaches_upstream_once_per_ttl() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    cache:
      enabled: true
      ttl: "200ms"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    for _ in 0..2 {
        let response = handler
            .handle_request(request("/orders/api/list?page=1"), peer())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(upstream.call_count(), 1);

    // Distinct query strings are distinct cache entries.
    handler
        .handle_request(request("/orders/api/list?page=2"), peer())
        .await
        .unwrap();
    assert_eq!(upstream.call_count(), 2);

    // After the TTL elapses the entry is stale and the upstream is hit again.
    tokio::time::sleep(Duration::from_millis(250)).await;
    handler
        .handle_request(request("/orders/api/list?page=1"), peer())
        .await
        .unwrap();
    assert_eq!(upstream.call_count(), 3);
}

#[tokio::test]
async fn non_get_requests_are_never_cached() {
    let config = r#"
services:
  orders:
    url: "http://upstream.test:8080"
    cache:
      enabled: true
      ttl: "60s"
"#;
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(config, upstream.clone()).await;

    for _ in 0..2 {
        let req = Request::builder()
            .method("POST")
            .uri("/orders/api/submit")
            .header("User-Agent", "gatehouse-tests/1.0")
            .header("X-Forwarded-For", "203.0.113.7")
            .body(Body::from("payload"))
            .unwrap();
        let response = handler.handle_request(req, peer()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(upstream.call_count(), 2);
}

#[tokio::test]
async fn upstream_transport_failure_is_502() {
    let upstream = MockUpstream::failing();
    let (handler, _file) = handler_for(PLAIN_SERVICE, upstream.clone()).await;

    let response = handler
        .handle_request(request("/orders/api"), peer())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    // No retries: exactly one attempt.
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn liveness_endpoints_bypass_the_pipeline() {
    let upstream = MockUpstream::new();
    let (handler, _file) = handler_for(PLAIN_SERVICE, upstream.clone()).await;

    // No User-Agent, no client address: the pipeline would reject this.
    let req = Request::builder()
        .method("GET")
        .uri("/livez")
        .body(Body::empty())
        .unwrap();

    let response = handler.handle_request(req, None).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 0);
}
