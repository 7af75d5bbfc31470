//! Process-wide TTL response cache.
//!
//! One store shared by every service; namespacing comes only from the key
//! prefix. Entries expire at `stored_at + ttl`; a periodic sweeper bounds
//! memory growth independent of request volume. The map is an `scc::HashMap`,
//! so lookups and inserts never contend on a single lock and the sweep only
//! holds per-bucket critical sections.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// How often the background sweep evicts expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// A stored upstream response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub expires_at: Instant,
}

impl CachedResponse {
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Shared TTL-based store for cached GET responses.
pub struct ResponseCache {
    entries: scc::HashMap<String, CachedResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: scc::HashMap::new(),
        }
    }

    /// Cache key for one request: service name, path, and the full original
    /// URI including the raw query string, so distinct queries are distinct
    /// entries.
    pub fn key(service: &str, path: &str, original_uri: &str) -> String {
        format!("{service}|{path}|{original_uri}")
    }

    /// Unexpired entry for `key`, if any. Expired entries are left for the
    /// sweeper.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let entry = self.entries.get_async(key).await?;
        let cached = entry.get();
        if cached.is_expired(Instant::now()) {
            return None;
        }
        Some(cached.clone())
    }

    /// Store (or replace) a response under `key`, servable for `ttl`.
    pub async fn insert(
        &self,
        key: String,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        ttl: Duration,
    ) {
        let cached = CachedResponse {
            status,
            headers,
            body,
            expires_at: Instant::now() + ttl,
        };
        let mut entry = self.entries.entry_async(key).await.or_insert(cached.clone());
        *entry.get_mut() = cached;
    }

    /// Evict every entry whose TTL has elapsed.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .retain_async(|_, cached| !cached.is_expired(now))
            .await;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the periodic sweep on its own task until the cache is dropped by
    /// every other holder.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.purge_expired().await;
                tracing::debug!(entries = cache.len(), "Response cache sweep completed");
            }
        })
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_simple(cache: &ResponseCache, key: &str, body: &'static str, ttl: Duration) {
        cache
            .insert(
                key.to_string(),
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from_static(body.as_bytes()),
                ttl,
            )
            .await;
    }

    #[tokio::test]
    async fn stores_and_returns_unexpired_entries() {
        let cache = ResponseCache::new();
        insert_simple(&cache, "orders|/a|/orders/a", "hello", Duration::from_secs(5)).await;

        let hit = cache.get("orders|/a|/orders/a").await.unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = ResponseCache::new();
        insert_simple(&cache, "k", "stale", Duration::from_millis(10)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_entries() {
        let cache = ResponseCache::new();
        insert_simple(&cache, "short", "a", Duration::from_millis(10)).await;
        insert_simple(&cache, "long", "b", Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.purge_expired().await;

        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").await.is_some());
    }

    #[tokio::test]
    async fn distinct_query_strings_are_distinct_keys() {
        let a = ResponseCache::key("orders", "/list", "/orders/list?page=1");
        let b = ResponseCache::key("orders", "/list", "/orders/list?page=2");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn insert_replaces_existing_entry() {
        let cache = ResponseCache::new();
        insert_simple(&cache, "k", "old", Duration::from_secs(60)).await;
        insert_simple(&cache, "k", "new", Duration::from_secs(60)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").await.unwrap().body, Bytes::from_static(b"new"));
    }
}
