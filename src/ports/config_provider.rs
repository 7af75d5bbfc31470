use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::MainConfig;

/// Trait for configuration providers that can load and watch for configuration changes.
///
/// `watch` returns a plain unit-event channel so the reload loop can be
/// driven by a synthetic sender in tests, with no filesystem involved.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the current configuration.
    async fn load_config(&self) -> Result<MainConfig>;

    /// Return a channel that signals when the configuration has changed.
    /// The receiver should trigger a reload.
    fn watch(&self) -> mpsc::Receiver<()>;
}
