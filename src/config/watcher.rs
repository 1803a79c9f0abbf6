//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - Command-line overrides are reapplied to every reloaded file, so a
//!   flag keeps winning over the file after a reload
//! - Editors emit several events per save; a reload is forwarded only when
//!   the resulting configuration differs from the last one forwarded
//! - An invalid file is logged and skipped; the running configuration stays

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::FleetConfig;
use crate::config::validation::validate_config;

/// Adjustments applied on top of every reloaded file.
pub type Overrides = Arc<dyn Fn(&mut FleetConfig) + Send + Sync>;

/// Watches the configuration file and forwards changed, valid configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    overrides: Option<Overrides>,
    last: FleetConfig,
    update_tx: mpsc::UnboundedSender<FleetConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration already in effect.
    pub fn new(path: &Path, current: FleetConfig) -> (Self, mpsc::UnboundedReceiver<FleetConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            overrides: None,
            last: current,
            update_tx,
        };
        (watcher, update_rx)
    }

    pub fn with_overrides<F>(mut self, overrides: F) -> Self
    where
        F: Fn(&mut FleetConfig) + Send + Sync + 'static,
    {
        self.overrides = Some(Arc::new(overrides));
        self
    }

    fn read(&self) -> Result<FleetConfig, ConfigError> {
        let mut config = load_config(&self.path)?;
        if let Some(overrides) = &self.overrides {
            overrides(&mut config);
            validate_config(&config).map_err(ConfigError::Validation)?;
        }
        Ok(config)
    }

    /// Re-read the file. Returns the configuration to apply, if any.
    fn reload(&mut self) -> Option<FleetConfig> {
        let config = match self.read() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to reload config, keeping current configuration");
                return None;
            }
        };
        if config == self.last {
            tracing::debug!(path = ?self.path, "Config unchanged");
            return None;
        }

        let (from, to) = (self.last.admission.threshold_percent, config.admission.threshold_percent);
        if from != to {
            tracing::info!(from, to, "Load-shedding threshold changed in config file");
        }
        self.last = config.clone();
        Some(config)
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(mut self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Some(config) = self.reload() {
                        if self.update_tx.send(config).is_err() {
                            tracing::debug!("Config receiver dropped");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempConfig(PathBuf);

    impl TempConfig {
        fn new(content: &str) -> Self {
            let path = std::env::temp_dir().join(format!("ws-fleet-{}.toml", uuid::Uuid::new_v4()));
            std::fs::write(&path, content).unwrap();
            Self(path)
        }

        fn write(&self, content: &str) {
            std::fs::write(&self.0, content).unwrap();
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn current(threshold: u8) -> FleetConfig {
        let mut config = FleetConfig::default();
        config.admission.threshold_percent = threshold;
        config
    }

    #[test]
    fn forwards_only_changed_configs() {
        let file = TempConfig::new("[admission]\nthreshold_percent = 50\n");
        let (mut watcher, _rx) = ConfigWatcher::new(&file.0, current(50));
        assert!(watcher.reload().is_none());

        file.write("[admission]\nthreshold_percent = 65\n");
        let reloaded = watcher.reload().unwrap();
        assert_eq!(reloaded.admission.threshold_percent, 65);
        assert!(watcher.reload().is_none());
    }

    #[test]
    fn invalid_file_keeps_last_config() {
        let file = TempConfig::new("[admission]\nthreshold_percent = 250\n");
        let (mut watcher, _rx) = ConfigWatcher::new(&file.0, current(50));
        assert!(watcher.reload().is_none());
        assert_eq!(watcher.last.admission.threshold_percent, 50);

        file.write("[admission\n");
        assert!(watcher.reload().is_none());
    }

    #[test]
    fn overrides_win_over_reloaded_file() {
        let file = TempConfig::new("[admission]\nthreshold_percent = 40\n\n[stats]\ninterval_secs = 5\n");
        let (watcher, _rx) = ConfigWatcher::new(&file.0, current(70));
        let mut watcher = watcher.with_overrides(|config| config.admission.threshold_percent = 70);

        let reloaded = watcher.reload().unwrap();
        assert_eq!(reloaded.admission.threshold_percent, 70);
        assert_eq!(reloaded.stats.interval_secs, 5);
    }
}
