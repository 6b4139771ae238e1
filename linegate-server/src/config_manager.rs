// Configuration hot reload

use linegate_core::LineConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Polls a configuration file's modification time and sends every newly
/// loaded [`LineConfig`] to the control loop.
///
/// A file that fails to parse is reported and skipped; the running
/// configuration stays in place until a valid file shows up.
pub struct ConfigWatcher {
    path: PathBuf,
    check_interval: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, check_interval: Duration) -> Self {
        Self {
            path: path.into(),
            check_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start watching. The task ends when the receiver is dropped.
    pub fn spawn(self, tx: mpsc::Sender<LineConfig>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    async fn run(self, tx: mpsc::Sender<LineConfig>) {
        let mut last_modified = modified(&self.path);
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.tick().await;
        info!("Watching {} for changes", self.path.display());

        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }

            let current = modified(&self.path);
            if current.is_none() || current == last_modified {
                continue;
            }
            last_modified = current;

            let Some(config) = self.load() else {
                continue;
            };
            if tx.send(config).await.is_err() {
                break;
            }
        }
        debug!("Config watcher for {} stopped", self.path.display());
    }

    fn load(&self) -> Option<LineConfig> {
        match LineConfig::from_file(&self.path) {
            Ok(mut config) => {
                config.apply_overrides(|key| std::env::var(key).ok());
                for issue in config.sanitize() {
                    warn!("Configuration: {}", issue);
                }
                info!("🔄 Reloaded configuration from {}", self.path.display());
                Some(config)
            }
            Err(e) => {
                warn!("Ignoring change to {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
