//! Fixed-window rate limiting.
//!
//! Reimplemented as an explicit internal component rather than a framework
//! plugin: a [`FixedWindowLimiter`] keeps one counter window per client IP,
//! and the [`RateLimiterRegistry`] lazily creates one limiter per service
//! with double-checked insertion. A limiter's parameters are frozen at
//! creation time; later configuration reloads do not rebuild it (keeping
//! in-window counters stable across reloads).

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use crate::core::policy::RateLimitPolicy;

/// Outcome of admitting one request against a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over the cap for the current window; retry once it rolls over.
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct WindowSlot {
    started_at: Instant,
    count: u64,
}

/// Counts requests per client IP in windows anchored at the first request:
/// a window opened at T0 admits up to `max_requests` until T0 + window, then
/// resets. Boundaries are relative to window creation, never wall-clock
/// aligned.
pub struct FixedWindowLimiter {
    max_requests: u64,
    window: Duration,
    slots: scc::HashMap<IpAddr, WindowSlot>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            slots: scc::HashMap::new(),
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one request from `client`.
    pub async fn try_acquire(&self, client: IpAddr) -> RateDecision {
        let now = Instant::now();

        let mut entry = self
            .slots
            .entry_async(client)
            .await
            .or_insert(WindowSlot {
                started_at: now,
                count: 0,
            });
        let slot = entry.get_mut();

        if now.duration_since(slot.started_at) >= self.window {
            slot.started_at = now;
            slot.count = 0;
        }

        if slot.count < self.max_requests {
            slot.count += 1;
            RateDecision::Allowed
        } else {
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(slot.started_at));
            RateDecision::Limited { retry_after }
        }
    }
}

/// Lazily creates and retains one limiter per service name.
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<FixedWindowLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the limiter for `service`, creating it from `policy` on first
    /// use. Optimistic read-lock lookup, then write-lock with a re-check so
    /// concurrent first requests construct exactly one limiter. An existing
    /// limiter is returned as-is even when `policy` has changed.
    pub fn obtain(&self, service: &str, policy: &RateLimitPolicy) -> Arc<FixedWindowLimiter> {
        if let Some(limiter) = self
            .limiters
            .read()
            .expect("rate limiter registry lock poisoned")
            .get(service)
        {
            return limiter.clone();
        }

        let mut limiters = self
            .limiters
            .write()
            .expect("rate limiter registry lock poisoned");
        limiters
            .entry(service.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    service,
                    max_requests = policy.max_requests,
                    window = ?policy.window,
                    "Creating rate limiter"
                );
                Arc::new(FixedWindowLimiter::new(policy.max_requests, policy.window))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.limiters
            .read()
            .expect("rate limiter registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
