//! The request policy pipeline.
//!
//! Every request shaped `/{service}/{rest...}` runs the ordered stages
//! IP filter -> User-Agent filter -> auth guard -> rate limiter -> response
//! cache -> proxy forwarder. A stage either short-circuits with a structured
//! JSON error response or passes control on; the forwarder is terminal. The
//! effective policy is resolved once per request from a single configuration
//! snapshot, so no stage can observe a half-applied reload.

use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, StatusCode, header},
};
use eyre::{Result, WrapErr};
use http_body_util::BodyExt;
use hyper::{Request, Response};

use crate::{
    config::store::ConfigStore,
    core::{
        ip_filter::{CidrCache, IpVerdict, evaluate_ip},
        policy::{EffectivePolicy, PolicyResolver},
        rate_limiter::{RateDecision, RateLimiterRegistry},
        response_cache::ResponseCache,
        ua_filter::{UserAgentNormalizer, ua_matches_list},
    },
    ports::http_client::HttpClient,
};

/// Short-circuit response produced by a pipeline stage.
type StageResult = Result<(), Box<Response<AxumBody>>>;

/// HTTP handler for the Gatehouse pipeline.
///
/// Owns references to every shared resource; nothing is reached through
/// global state. One instance serves all requests.
pub struct HttpHandler {
    config_store: Arc<ConfigStore>,
    http_client: Arc<dyn HttpClient>,
    cidr_cache: Arc<CidrCache>,
    ua_normalizer: Arc<UserAgentNormalizer>,
    rate_limiters: Arc<RateLimiterRegistry>,
    response_cache: Arc<ResponseCache>,
}

impl HttpHandler {
    pub fn new(
        config_store: Arc<ConfigStore>,
        http_client: Arc<dyn HttpClient>,
        cidr_cache: Arc<CidrCache>,
        ua_normalizer: Arc<UserAgentNormalizer>,
        rate_limiters: Arc<RateLimiterRegistry>,
        response_cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            config_store,
            http_client,
            cidr_cache,
            ua_normalizer,
            rate_limiters,
            response_cache,
        }
    }

    /// Main request handler: liveness endpoints first, everything else goes
    /// through the policy pipeline.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        match req.uri().path() {
            "/livez" => self.handle_liveness(),
            "/readyz" => self.handle_readiness(),
            _ => self.handle_pipeline(req, client_addr).await,
        }
    }

    fn handle_liveness(&self) -> Result<Response<AxumBody>, eyre::Error> {
        let body = serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(body.to_string()))
            .wrap_err("Failed to build liveness response")
    }

    fn handle_readiness(&self) -> Result<Response<AxumBody>, eyre::Error> {
        let snapshot = self.config_store.current();
        let body = serde_json::json!({
            "status": "ready",
            "services": snapshot.services.len(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(body.to_string()))
            .wrap_err("Failed to build readiness response")
    }

    async fn handle_pipeline(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        let path = req.uri().path().to_string();
        let (service_name, rest) = split_service_path(&path);

        if service_name.is_empty() {
            return Ok(error_response(StatusCode::NOT_FOUND, "Service not found"));
        }

        // One snapshot per request: every stage sees the same committed config.
        let snapshot = self.config_store.current();
        let policy = match PolicyResolver::resolve(&snapshot, service_name) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(service = service_name, "Rejecting request: {e}");
                return Ok(error_response(StatusCode::NOT_FOUND, "Service not found"));
            }
        };

        let client_ip = match self.resolve_client_ip(req.headers(), client_addr) {
            Ok(ip) => ip,
            Err(response) => return Ok(*response),
        };

        if let Err(response) = self.ip_filter_stage(&policy, client_ip) {
            return Ok(*response);
        }
        if let Err(response) = self.ua_filter_stage(&policy, req.headers()) {
            return Ok(*response);
        }
        if let Err(response) = self.auth_guard_stage(&policy, req.headers()) {
            return Ok(*response);
        }
        if let Err(response) = self.rate_limiter_stage(&policy, client_ip).await {
            return Ok(*response);
        }

        self.cache_and_forward(req, &policy, rest).await
    }

    /// Resolve the effective client IP, accounting for proxy headers:
    /// `X-Forwarded-For` (first hop), then `X-Real-IP`, then the socket peer
    /// address. An unresolvable or unparsable address is a 400.
    fn resolve_client_ip(
        &self,
        headers: &HeaderMap,
        client_addr: Option<SocketAddr>,
    ) -> Result<IpAddr, Box<Response<AxumBody>>> {
        let candidate = effective_client_ip(headers, client_addr);

        let Some(candidate) = candidate else {
            tracing::warn!("Rejecting request without a resolvable client address");
            return Err(Box::new(error_response(
                StatusCode::BAD_REQUEST,
                "Invalid IP address",
            )));
        };

        IpAddr::from_str(candidate.trim()).map_err(|_| {
            tracing::warn!(client = %candidate, "Rejecting request with unparsable client address");
            Box::new(error_response(
                StatusCode::BAD_REQUEST,
                "Invalid IP address",
            ))
        })
    }

    /// Block check first (union of global and service lists), then the allow
    /// restriction (override semantics, already folded into the policy).
    fn ip_filter_stage(&self, policy: &EffectivePolicy, client_ip: IpAddr) -> StageResult {
        match evaluate_ip(
            &self.cidr_cache,
            client_ip,
            &policy.ip_blocklist,
            &policy.ip_allowlist,
        ) {
            IpVerdict::Allowed => Ok(()),
            IpVerdict::Blocked => {
                tracing::warn!(service = %policy.service_name, client = %client_ip, "IP blocked");
                Err(Box::new(error_response(
                    StatusCode::FORBIDDEN,
                    &format!("IP {client_ip} is blocked"),
                )))
            }
            IpVerdict::NotAllowed => {
                tracing::warn!(service = %policy.service_name, client = %client_ip, "IP not in allowlist");
                Err(Box::new(error_response(
                    StatusCode::FORBIDDEN,
                    &format!("IP {client_ip} is not allowed"),
                )))
            }
        }
    }

    fn ua_filter_stage(&self, policy: &EffectivePolicy, headers: &HeaderMap) -> StageResult {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());

        let Some(user_agent) = user_agent else {
            tracing::warn!(service = %policy.service_name, "Missing User-Agent header");
            return Err(Box::new(error_response(
                StatusCode::FORBIDDEN,
                "User-Agent header is required",
            )));
        };

        let normalized = self.ua_normalizer.normalize(user_agent);

        // Service block list first: more specific rules take precedence.
        if ua_matches_list(&normalized, &policy.ua_blocklist_service) {
            tracing::warn!(service = %policy.service_name, user_agent, "User-Agent blocked for service");
            return Err(Box::new(error_response(
                StatusCode::FORBIDDEN,
                "User-Agent is blocked for this service",
            )));
        }

        if ua_matches_list(&normalized, &policy.ua_blocklist_global) {
            tracing::warn!(service = %policy.service_name, user_agent, "User-Agent blocked globally");
            return Err(Box::new(error_response(
                StatusCode::FORBIDDEN,
                "User-Agent is blocked globally",
            )));
        }

        if !policy.ua_allowlist.is_empty() && !ua_matches_list(&normalized, &policy.ua_allowlist) {
            tracing::warn!(service = %policy.service_name, user_agent, "User-Agent not in allowlist");
            return Err(Box::new(error_response(
                StatusCode::FORBIDDEN,
                "User-Agent is not allowed",
            )));
        }

        Ok(())
    }

    fn auth_guard_stage(&self, policy: &EffectivePolicy, headers: &HeaderMap) -> StageResult {
        let Some(auth) = &policy.auth else {
            return Ok(());
        };

        let provided = headers
            .get(auth.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());

        match provided {
            None => {
                tracing::warn!(service = %policy.service_name, header = %auth.header_name, "API key missing");
                Err(Box::new(error_response(
                    StatusCode::UNAUTHORIZED,
                    "API key is missing",
                )))
            }
            Some(value) if value != auth.expected_value => {
                tracing::warn!(service = %policy.service_name, header = %auth.header_name, "API key mismatch");
                Err(Box::new(error_response(
                    StatusCode::FORBIDDEN,
                    "Invalid API key",
                )))
            }
            Some(_) => Ok(()),
        }
    }

    async fn rate_limiter_stage(
        &self,
        policy: &EffectivePolicy,
        client_ip: IpAddr,
    ) -> StageResult {
        let Some(rate_limit) = &policy.rate_limit else {
            return Ok(());
        };

        let limiter = self.rate_limiters.obtain(&policy.service_name, rate_limit);

        match limiter.try_acquire(client_ip).await {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited { retry_after } => {
                tracing::warn!(
                    service = %policy.service_name,
                    client = %client_ip,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                let mut response =
                    error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
                // Round up so clients never retry a moment too early.
                let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                if let Ok(value) = seconds.to_string().parse() {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                Err(Box::new(response))
            }
        }
    }

    /// Cache stage and terminal proxy forwarder. A hit answers directly from
    /// the store; a miss forwards and, for successful GETs under a cache
    /// policy, stores the buffered response.
    async fn cache_and_forward(
        &self,
        req: Request<AxumBody>,
        policy: &EffectivePolicy,
        rest: &str,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        let cacheable = policy.cache.is_some() && req.method() == hyper::Method::GET;
        let original_uri = req.uri().to_string();
        let cache_key = ResponseCache::key(&policy.service_name, req.uri().path(), &original_uri);

        if cacheable {
            if let Some(cached) = self.response_cache.get(&cache_key).await {
                tracing::debug!(service = %policy.service_name, key = %cache_key, "Cache hit");
                let mut builder = Response::builder().status(cached.status);
                if let Some(headers) = builder.headers_mut() {
                    *headers = cached.headers.clone();
                }
                return builder
                    .body(AxumBody::from(cached.body.clone()))
                    .wrap_err("Failed to build cached response");
            }
        }

        let upstream_response = match self.forward(req, policy, rest).await {
            Ok(response) => response,
            Err(response) => return Ok(*response),
        };

        if cacheable && upstream_response.status().is_success() {
            let ttl = policy
                .cache
                .as_ref()
                .map(|c| c.ttl)
                .unwrap_or_default();
            let (parts, body) = upstream_response.into_parts();
            let bytes = body
                .collect()
                .await
                .wrap_err("Failed to buffer upstream response body")?
                .to_bytes();

            self.response_cache
                .insert(
                    cache_key,
                    parts.status,
                    parts.headers.clone(),
                    bytes.clone(),
                    ttl,
                )
                .await;

            return Ok(Response::from_parts(parts, AxumBody::from(bytes)));
        }

        Ok(upstream_response)
    }

    /// Terminal stage: forward to the upstream, passing status, headers, and
    /// body through unmodified. Transport-level failures become 502; there
    /// are no retries.
    async fn forward(
        &self,
        req: Request<AxumBody>,
        policy: &EffectivePolicy,
        rest: &str,
    ) -> Result<Response<AxumBody>, Box<Response<AxumBody>>> {
        let query = req
            .uri()
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        let target = format!(
            "{}/{}{}",
            policy.upstream_url.trim_end_matches('/'),
            rest,
            query
        );

        let (mut parts, body) = req.into_parts();
        parts.uri = match target.parse() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(service = %policy.service_name, target, "Invalid upstream URI: {e}");
                return Err(Box::new(error_response(
                    StatusCode::BAD_GATEWAY,
                    "Failed to proxy request",
                )));
            }
        };

        match self
            .http_client
            .send_request(Request::from_parts(parts, body))
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!(service = %policy.service_name, "Upstream request failed: {e}");
                Err(Box::new(error_response(
                    StatusCode::BAD_GATEWAY,
                    "Failed to proxy request",
                )))
            }
        }
    }
}

impl Clone for HttpHandler {
    fn clone(&self) -> Self {
        Self {
            config_store: self.config_store.clone(),
            http_client: self.http_client.clone(),
            cidr_cache: self.cidr_cache.clone(),
            ua_normalizer: self.ua_normalizer.clone(),
            rate_limiters: self.rate_limiters.clone(),
            response_cache: self.response_cache.clone(),
        }
    }
}

/// Split `/{service}/{rest...}` into the service name and the wildcard
/// remainder (without its leading slash).
fn split_service_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, rest)) => (service, rest),
        None => (trimmed, ""),
    }
}

/// Effective client IP resolution: proxy headers first, socket peer last.
fn effective_client_ip(headers: &HeaderMap, client_addr: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded_for) = headers.get("X-Forwarded-For")
        && let Ok(value) = forwarded_for.to_str()
    {
        // First IP in the chain is the originating client.
        return value.split(',').next().map(|ip| ip.trim().to_string());
    }

    if let Some(real_ip) = headers.get("X-Real-IP")
        && let Ok(value) = real_ip.to_str()
    {
        return Some(value.to_string());
    }

    client_addr.map(|addr| addr.ip().to_string())
}

/// Structured error body shared by every stage rejection.
fn error_response(status: StatusCode, message: &str) -> Response<AxumBody> {
    let body = serde_json::json!({ "error": message });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(AxumBody::from(body.to_string()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(AxumBody::from("Internal Server Error"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_service_and_remainder() {
        assert_eq!(split_service_path("/orders/api/v1"), ("orders", "api/v1"));
        assert_eq!(split_service_path("/orders/"), ("orders", ""));
        assert_eq!(split_service_path("/orders"), ("orders", ""));
        assert_eq!(split_service_path("/"), ("", ""));
    }

    #[test]
    fn forwarded_for_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "1.2.3.4, 10.0.0.1".parse().unwrap());
        headers.insert("X-Real-IP", "5.6.7.8".parse().unwrap());

        let addr: SocketAddr = "9.9.9.9:1234".parse().unwrap();
        assert_eq!(
            effective_client_ip(&headers, Some(addr)),
            Some("1.2.3.4".to_string())
        );
    }

    #[test]
    fn real_ip_falls_back_before_socket_addr() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "5.6.7.8".parse().unwrap());

        let addr: SocketAddr = "9.9.9.9:1234".parse().unwrap();
        assert_eq!(
            effective_client_ip(&headers, Some(addr)),
            Some("5.6.7.8".to_string())
        );
        assert_eq!(
            effective_client_ip(&HeaderMap::new(), Some(addr)),
            Some("9.9.9.9".to_string())
        );
    }

    #[test]
    fn no_source_yields_none() {
        assert_eq!(effective_client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn error_response_is_json() {
        let response = error_response(StatusCode::FORBIDDEN, "IP 1.2.3.4 is blocked");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
