//! Debounced configuration reload loop.
//!
//! Consumes change notifications from a [`ConfigProvider`](crate::ports::config_provider::ConfigProvider)
//! watch channel and turns them into [`ConfigStore::reload`] calls. The
//! channel carries unit events only, so tests can drive the loop with a
//! synthetic sender instead of a real filesystem watcher.
use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{config::store::ConfigStore, core::ip_filter::CidrCache};

/// Default cooldown between reload attempts. Editors often emit bursts of
/// events for a single save (truncate + write + rename).
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Run until the notification channel closes. Each qualifying event triggers
/// a reload; a failed reload is logged and the previous snapshot stays
/// authoritative. After every successful reload the CIDR cache is cleared so
/// stale literals from prior configs don't accumulate.
pub async fn run_reload_loop(
    store: Arc<ConfigStore>,
    cidr_cache: Arc<CidrCache>,
    mut events: mpsc::Receiver<()>,
    debounce: Duration,
) {
    tracing::info!("Config watcher task started");

    let mut last_attempt = tokio::time::Instant::now();
    last_attempt = last_attempt.checked_sub(debounce).unwrap_or(last_attempt);

    while events.recv().await.is_some() {
        if last_attempt.elapsed() < debounce {
            tracing::debug!("Debouncing config reload event, still within cooldown");
            while events.try_recv().is_ok() {}
            continue;
        }
        last_attempt = tokio::time::Instant::now();

        tracing::info!(path = %store.path().display(), "Reloading configuration");

        match store.reload().await {
            Ok(()) => {
                cidr_cache.clear();
                tracing::info!("Configuration reloaded");
            }
            Err(e) => {
                tracing::error!(
                    "Failed to reload configuration: {e:#}. Keeping old configuration."
                );
            }
        }

        // Collapse any events that arrived while reloading.
        while events.try_recv().is_ok() {}
    }

    tracing::info!("Config watcher task is shutting down");
}
