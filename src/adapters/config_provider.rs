//! Filesystem-backed configuration provider.
//!
//! Watches the config file's **parent directory** rather than the file
//! itself: editors and deploy tooling typically replace files via
//! write-to-temp + rename, which would unlink a watched inode. Only
//! write/create events whose file name matches the configured file are
//! forwarded; everything else in the directory is ignored.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::MainConfig},
    ports::config_provider::ConfigProvider,
};

/// Does this filesystem event concern the watched config file?
fn is_config_event(event: &notify::Event, config_filename: &OsStr) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(config_filename))
}

pub struct FileConfigProvider {
    path: PathBuf,
    // Dropping the watcher stops event delivery, so it lives as long as the provider.
    _watcher: notify::RecommendedWatcher,
    // Handed out once by `watch()`.
    events_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path: {}", path.display()))?
            .to_owned();

        // Capacity 1 is enough: coalesced events all mean "reload now".
        let (events_tx, events_rx) = mpsc::channel(1);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) if is_config_event(&event, &filename) => {
                        tracing::debug!(kind = ?event.kind, "Config file changed");
                        // A full channel already carries a pending reload.
                        let _ = events_tx.try_send(());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        let watch_dir = path.parent().unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch config directory")?;

        Ok(Self {
            path,
            _watcher: watcher,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        })
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<MainConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid path"))?;
        load_config(path_str).await
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        self.events_rx
            .lock()
            .expect("events_rx mutex poisoned")
            .take()
            .expect("watch can only be called once")
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::tempdir;
    use tokio::time::{Duration, sleep};

    use super::*;

    #[test]
    fn event_filter_matches_only_the_config_file() {
        let filename = OsStr::new("main.yaml");

        let write_event = notify::Event {
            kind: notify::EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![PathBuf::from("/etc/gatehouse/main.yaml")],
            attrs: Default::default(),
        };
        assert!(is_config_event(&write_event, filename));

        let other_file = notify::Event {
            paths: vec![PathBuf::from("/etc/gatehouse/other.yaml")],
            ..write_event.clone()
        };
        assert!(!is_config_event(&other_file, filename));

        let remove_event = notify::Event {
            kind: notify::EventKind::Remove(notify::event::RemoveKind::Any),
            paths: vec![PathBuf::from("/etc/gatehouse/main.yaml")],
            attrs: Default::default(),
        };
        assert!(!is_config_event(&remove_event, filename));
    }

    #[tokio::test]
    async fn rewrite_of_the_config_file_notifies() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("main.yaml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                b"services:\n  orders:\n    url: \"http://orders.internal:8080\"\n",
            )?;
        }

        let provider = FileConfigProvider::new(&file_path)?;
        assert!(provider.load_config().await?.services.contains_key("orders"));

        let mut rx = provider.watch();

        // Give the platform watcher a moment, then rewrite the file.
        sleep(Duration::from_millis(100)).await;
        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                b"services:\n  billing:\n    url: \"http://billing.internal:8080\"\n",
            )?;
        }

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notification.is_ok(), "Timed out waiting for config update");
        assert!(
            notification.unwrap().is_some(),
            "Channel closed unexpectedly"
        );

        assert!(provider.load_config().await?.services.contains_key("billing"));
        Ok(())
    }

    #[tokio::test]
    async fn unrelated_files_do_not_notify() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("main.yaml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(b"services: {}")?;
        }

        let provider = FileConfigProvider::new(&file_path)?;
        let mut rx = provider.watch();

        {
            let mut file = File::create(dir.path().join("other.yaml"))?;
            file.write_all(b"irrelevant: true")?;
        }

        let notification = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(
            notification.is_err(),
            "Unrelated file change produced an event"
        );

        Ok(())
    }
}
