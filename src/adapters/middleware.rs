//! Cross-cutting Axum middleware layers.
//!
//! Thin composable layers attached to the router around the policy pipeline:
//! hardening headers, permissive CORS, per-request IDs, and a request log
//! line gated by the `global.logging` configuration flag. All of them are
//! stateless apart from reading the current config snapshot.
use std::{sync::Arc, time::Instant};

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};

use crate::config::store::ConfigStore;

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
];

/// Attach common hardening headers to every response.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;

    for (name, value) in SECURITY_HEADERS {
        response
            .headers_mut()
            .insert(name, HeaderValue::from_static(value));
    }

    response
}

/// Permissive CORS: reflect the caller's Origin and advertise the usual
/// methods and headers.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    let origin = req.headers().get("origin").cloned();
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if let Some(origin) = origin {
        headers.insert("Access-Control-Allow-Origin", origin);
    }
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization, X-Requested-With"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));

    response
}

/// Tag each request with a UUID, exposed in the tracing span and echoed back
/// as `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let span = tracing::info_span!("request", request_id = %request_id);
    let _enter = span.enter();

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", value);
    }

    response
}

/// One log line per request with status and latency, active only while the
/// current snapshot has `global.logging: true`. The flag is re-read per
/// request, so a reload flips logging without a restart.
pub async fn request_logging_middleware(
    req: Request,
    next: Next,
    config_store: Arc<ConfigStore>,
) -> Response {
    let enabled = config_store
        .current()
        .global
        .as_ref()
        .is_some_and(|g| g.logging);

    if !enabled {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        http.method = %method,
        http.uri = %uri,
        http.status_code = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

/// Create a cloneable closure wrapping [`request_logging_middleware`].
pub fn create_request_logging_middleware(
    config_store: Arc<ConfigStore>,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
+ Clone {
    move |req, next| {
        let config_store = config_store.clone();
        Box::pin(async move { request_logging_middleware(req, next, config_store).await })
    }
}
