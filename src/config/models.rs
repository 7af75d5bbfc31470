//! Configuration data structures for Gatehouse.
//!
//! These types map directly to the YAML configuration file. They are
//! intentionally serde-friendly and include defaults so that minimal configs
//! remain concise. A `MainConfig` snapshot is immutable once published; the
//! [`ConfigStore`](crate::config::store::ConfigStore) replaces it wholesale.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration snapshot: named services plus optional global defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MainConfig {
    /// Logical service name -> upstream target and policy.
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    /// Fallback policy applied when a service omits a setting.
    #[serde(default)]
    pub global: Option<GlobalConfig>,
}

/// One upstream target and its policy configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Always equals the key this service is registered under; the loader
    /// backfills it so log lines and limiter keys don't depend on the map.
    #[serde(default)]
    pub name: String,
    /// Absolute base URL of the upstream (http or https).
    pub url: String,
    #[serde(flatten)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

/// Fallback policy applied when a service omits a setting.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GlobalConfig {
    #[serde(flatten)]
    pub firewall: FirewallConfig,
    /// Enables the per-request log line middleware.
    #[serde(default)]
    pub logging: bool,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// IP and User-Agent allow/block rules, embeddable at both levels.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FirewallConfig {
    /// IP-or-CIDR literals; a non-empty list restricts clients to matches.
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    /// IP-or-CIDR literals; any match rejects the client.
    #[serde(default)]
    pub ip_blocklist: Vec<String>,
    /// Case-insensitive substrings; a non-empty list restricts User-Agents.
    #[serde(default)]
    pub user_agent_allowlist: Vec<String>,
    /// Case-insensitive substrings; any match rejects the User-Agent.
    #[serde(default)]
    pub user_agent_blocklist: Vec<String>,
}

impl FirewallConfig {
    /// Every IP-or-CIDR literal in this block, allow and block lists alike.
    pub fn ip_literals(&self) -> impl Iterator<Item = &String> {
        self.ip_allowlist.iter().chain(self.ip_blocklist.iter())
    }
}

/// Static API-key requirement for a service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Header carrying the key, e.g. "X-Api-Key".
    #[serde(default)]
    pub header_name: String,
    /// Expected header value, compared by plain string equality.
    #[serde(default)]
    pub value: String,
}

/// Fixed-window rate limiting parameters.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Requests admitted per window.
    #[serde(default)]
    pub max_requests: u64,
    /// Window duration, parsed by humantime, e.g., "1s", "5m", "1h".
    #[serde(default)]
    pub period: String,
}

impl RateLimitConfig {
    /// Parsed window duration, `None` when absent or unparseable.
    pub fn window(&self) -> Option<Duration> {
        humantime::parse_duration(&self.period).ok()
    }
}

/// Response caching parameters.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Time a cached response remains servable, e.g., "5s", "2m".
    #[serde(default)]
    pub ttl: String,
}

impl CacheConfig {
    /// Parsed TTL, `None` when absent or unparseable.
    pub fn ttl_duration(&self) -> Option<Duration> {
        humantime::parse_duration(&self.ttl).ok()
    }
}
