//! Per-request policy resolution.
//!
//! Merges global defaults and service-level overrides into one
//! [`EffectivePolicy`] for a named service, applied independently per policy
//! dimension:
//!
//! * block lists (IP and User-Agent): union of both levels, a match at
//!   either level blocks;
//! * allow lists: override, a non-empty service list alone is authoritative,
//!   else a non-empty global list, else no allow restriction;
//! * rate limit / cache: override, the service setting wins when present and
//!   enabled, else the global setting when present and enabled;
//! * auth: service-level only, there is no global fallback.
//!
//! Resolution happens once per request against a single config snapshot, so
//! every pipeline stage sees the same fully committed configuration.

use std::time::Duration;

use thiserror::Error;

use crate::config::models::{MainConfig, RateLimitConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The request named a service absent from the configuration. Every
    /// pipeline stage maps this to a 404 and never reaches the upstream.
    #[error("service '{0}' not found")]
    ServiceNotFound(String),
}

/// Resolved fixed-window rate limit parameters, known positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
}

/// Resolved response-cache parameters, TTL known positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
}

/// Resolved API-key requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    pub header_name: String,
    pub expected_value: String,
}

/// The merged policy a single request is evaluated against.
#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    pub service_name: String,
    pub upstream_url: String,
    /// Union of global and service entries; either level blocks.
    pub ip_blocklist: Vec<String>,
    /// Override: service list if non-empty, else global, else empty.
    pub ip_allowlist: Vec<String>,
    /// Checked before the global list; first match short-circuits.
    pub ua_blocklist_service: Vec<String>,
    pub ua_blocklist_global: Vec<String>,
    /// Override semantics, same as `ip_allowlist`.
    pub ua_allowlist: Vec<String>,
    pub auth: Option<AuthPolicy>,
    pub rate_limit: Option<RateLimitPolicy>,
    pub cache: Option<CachePolicy>,
}

pub struct PolicyResolver;

impl PolicyResolver {
    /// Compute the effective policy for `service_name` against `config`.
    pub fn resolve(
        config: &MainConfig,
        service_name: &str,
    ) -> Result<EffectivePolicy, PolicyError> {
        let service = config
            .services
            .get(service_name)
            .ok_or_else(|| PolicyError::ServiceNotFound(service_name.to_string()))?;

        let global_firewall = config.global.as_ref().map(|g| &g.firewall);

        let mut ip_blocklist = Vec::new();
        if let Some(fw) = global_firewall {
            ip_blocklist.extend(fw.ip_blocklist.iter().cloned());
        }
        ip_blocklist.extend(service.firewall.ip_blocklist.iter().cloned());

        let ip_allowlist = if !service.firewall.ip_allowlist.is_empty() {
            service.firewall.ip_allowlist.clone()
        } else {
            global_firewall
                .map(|fw| fw.ip_allowlist.clone())
                .unwrap_or_default()
        };

        let ua_allowlist = if !service.firewall.user_agent_allowlist.is_empty() {
            service.firewall.user_agent_allowlist.clone()
        } else {
            global_firewall
                .map(|fw| fw.user_agent_allowlist.clone())
                .unwrap_or_default()
        };

        let auth = service.auth.as_ref().filter(|a| a.enabled).map(|a| AuthPolicy {
            header_name: a.header_name.clone(),
            expected_value: a.value.clone(),
        });

        let rate_limit = Self::resolve_rate_limit(
            service.rate_limit.as_ref(),
            config.global.as_ref().and_then(|g| g.rate_limit.as_ref()),
        );

        let cache = service
            .cache
            .as_ref()
            .filter(|c| c.enabled)
            .or_else(|| {
                config
                    .global
                    .as_ref()
                    .and_then(|g| g.cache.as_ref())
                    .filter(|c| c.enabled)
            })
            .and_then(|c| c.ttl_duration())
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| CachePolicy { ttl });

        Ok(EffectivePolicy {
            service_name: service.name.clone(),
            upstream_url: service.url.clone(),
            ip_blocklist,
            ip_allowlist,
            ua_blocklist_service: service.firewall.user_agent_blocklist.clone(),
            ua_blocklist_global: global_firewall
                .map(|fw| fw.user_agent_blocklist.clone())
                .unwrap_or_default(),
            ua_allowlist,
            auth,
            rate_limit,
            cache,
        })
    }

    /// Override semantics with a pass-through guard: unusable parameters
    /// (zero requests, missing or zero window) disable limiting entirely.
    fn resolve_rate_limit(
        service: Option<&RateLimitConfig>,
        global: Option<&RateLimitConfig>,
    ) -> Option<RateLimitPolicy> {
        let chosen = service.filter(|rl| rl.enabled).or(global.filter(|rl| rl.enabled))?;

        if chosen.max_requests == 0 {
            return None;
        }

        let window = chosen.window().filter(|w| !w.is_zero())?;

        Some(RateLimitPolicy {
            max_requests: chosen.max_requests,
            window,
        })
    }
}
