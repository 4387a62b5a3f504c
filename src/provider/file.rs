//! File provider: a TOML or JSON dynamic configuration, optionally watched.
//!
//! The parent directory is watched rather than the file itself, so that
//! editors that replace the file (write + rename) keep triggering reloads.
//! A file that fails to parse is logged and ignored; the last good
//! configuration stays in effect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::load_dynamic;
use crate::config::schema::FileProviderConfig;
use crate::lifecycle::TaskPool;
use crate::provider::{ConfigMessage, Provider, ProviderError};

pub const FILE_PROVIDER: &str = "file";

pub struct FileProvider {
    path: PathBuf,
    watch: bool,
}

impl FileProvider {
    pub fn new(config: &FileProviderConfig) -> Self {
        Self {
            path: config.path.clone(),
            watch: config.watch,
        }
    }

    fn message(&self) -> Option<ConfigMessage> {
        match load_dynamic(&self.path) {
            Ok(configuration) => Some(ConfigMessage {
                provider_name: FILE_PROVIDER.to_string(),
                configuration: Some(configuration),
            }),
            Err(e) => {
                tracing::error!(
                    provider = FILE_PROVIDER,
                    error = %e,
                    "Failed to load dynamic configuration, keeping current configuration"
                );
                None
            }
        }
    }

    fn watcher(&self, tx: mpsc::UnboundedSender<ConfigMessage>) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let file_name = path.file_name().map(|name| name.to_os_string());
        let provider = Self {
            path: path.clone(),
            watch: true,
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|changed| changed.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        tracing::info!(provider = FILE_PROVIDER, path = ?provider.path, "Dynamic configuration changed");
                        if let Some(message) = provider.message() {
                            let _ = tx.send(message);
                        }
                    }
                }
                Err(e) => tracing::error!(provider = FILE_PROVIDER, error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(watch_dir(&path), RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

impl Provider for FileProvider {
    fn name(&self) -> &str {
        FILE_PROVIDER
    }

    fn init(&mut self) -> Result<(), ProviderError> {
        if !self.path.is_file() {
            return Err(ProviderError::NotFound {
                provider: FILE_PROVIDER.to_string(),
                path: self.path.clone(),
            });
        }
        load_dynamic(&self.path).map_err(|source| ProviderError::Config {
            provider: FILE_PROVIDER.to_string(),
            source,
        })?;
        Ok(())
    }

    fn provide(&self, tx: mpsc::UnboundedSender<ConfigMessage>, pool: &TaskPool) -> Result<(), ProviderError> {
        if let Some(message) = self.message() {
            let _ = tx.send(message);
        }
        if !self.watch {
            return Ok(());
        }

        let watcher = self.watcher(tx.clone()).map_err(|source| ProviderError::Watch {
            provider: FILE_PROVIDER.to_string(),
            source,
        })?;
        tracing::info!(provider = FILE_PROVIDER, path = ?self.path, "Watching dynamic configuration");

        // The watcher lives until shutdown; dropping it closes its sender.
        pool.spawn(move |mut shutdown| async move {
            let _ = shutdown.recv().await;
            drop(watcher);
            let _ = tx.send(ConfigMessage {
                provider_name: FILE_PROVIDER.to_string(),
                configuration: None,
            });
        });
        Ok(())
    }
}
