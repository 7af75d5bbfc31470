//! Coordinated process shutdown.
//!
//! One `GracefulShutdown` instance is shared by the signal handler task and
//! the server loop. The first SIGINT or SIGTERM wins; every subscriber is
//! notified once, after which the server stops accepting connections and
//! drains in-flight requests before the process exits 0.

use std::sync::atomic::{AtomicBool, Ordering};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Why the process is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM received.
    Signal,
    /// Requested programmatically (tests, embedders).
    Requested,
}

pub struct GracefulShutdown {
    notify_tx: broadcast::Sender<ShutdownReason>,
    initiated: AtomicBool,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(4);
        Self {
            notify_tx,
            initiated: AtomicBool::new(false),
        }
    }

    /// Whether a shutdown has already been requested.
    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Relaxed)
    }

    /// Request shutdown. Only the first call notifies; later calls are
    /// ignored so a signal racing a programmatic request can't double-fire.
    pub fn request(&self, reason: ShutdownReason) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            tracing::warn!(?reason, "Shutdown already initiated, ignoring");
            return;
        }

        tracing::info!(?reason, "Initiating shutdown");
        // Send fails only when nothing subscribed yet; the flag still stops
        // the server via `wait` subscribers created later observing a closed
        // channel.
        let _ = self.notify_tx.send(reason);
    }

    /// Block until a shutdown is requested.
    pub async fn wait(&self) -> ShutdownReason {
        // Subscribe before checking the flag so a request landing in between
        // is never missed.
        let mut rx = self.notify_tx.subscribe();
        if self.is_initiated() {
            return ShutdownReason::Requested;
        }
        rx.recv().await.unwrap_or(ShutdownReason::Signal)
    }

    /// Listen for SIGINT and SIGTERM, translating the first one received into
    /// a shutdown request. Runs until a signal arrives.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started, listening for SIGINT and SIGTERM");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm() => {
                tracing::info!("Received SIGTERM");
            }
        }

        self.request(ShutdownReason::Signal);
        Ok(())
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut stream = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    stream.recv().await;
}

#[cfg(not(unix))]
async fn sigterm() {
    // Only Ctrl+C is available here.
    std::future::pending::<()>().await;
}
