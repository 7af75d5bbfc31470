//! Hot-swappable configuration snapshot store.
//!
//! The store owns the single authoritative `Arc<MainConfig>` behind an
//! `ArcSwap`: readers take a lock-free snapshot, the writer replaces it
//! wholesale after a successful parse + validate. Reloads are serialized by a
//! dedicated async mutex that readers never touch, so a slow or failing
//! reload cannot stall traffic.
use std::{path::PathBuf, sync::Arc};

use arc_swap::ArcSwap;
use eyre::{Context, Result};
use tokio::sync::Mutex as TokioMutex;

use crate::config::{loader::load_config, validation::MainConfigValidator, models::MainConfig};

pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<MainConfig>,
    // Serializes reload attempts relative to one another; never held by readers.
    reload_lock: TokioMutex<()>,
}

impl ConfigStore {
    /// Load, validate, and publish the initial snapshot. Any failure here is
    /// fatal: the gateway must not begin serving without a valid configuration.
    pub async fn bootstrap(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        let config = Self::load_validated(&path).await?;

        Ok(Arc::new(Self {
            path,
            current: ArcSwap::new(Arc::new(config)),
            reload_lock: TokioMutex::new(()),
        }))
    }

    /// Current snapshot. Never returns a partially-constructed value: the
    /// swap is atomic and only ever installs fully validated configs.
    pub fn current(&self) -> Arc<MainConfig> {
        self.current.load_full()
    }

    /// Path of the backing configuration file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Re-read the backing file and, only if it parses and validates,
    /// atomically publish it. On failure the previous snapshot stays
    /// authoritative and the error is returned for logging.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;

        let config = Self::load_validated(&self.path).await?;
        self.current.store(Arc::new(config));

        Ok(())
    }

    async fn load_validated(path: &std::path::Path) -> Result<MainConfig> {
        let path_str = path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

        let config = load_config(path_str)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        MainConfigValidator::validate(&config)
            .with_context(|| format!("Config validation failed for {}", path.display()))?;

        Ok(config)
    }
}
