//! Application state shared across handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use veille_core::{
    AlarmSink, BeaconRegistry, ConfigStore, Monitor, MonitorConfig, RadioScanner,
    StatusPublisher, WatchStatusSink,
};

/// Shared application state.
pub type SharedState = Arc<RwLock<AppState>>;

/// Everything the handlers need.
///
/// The monitor and the configuration store synchronize internally; the lock
/// serializes configuration writes so the file on disk matches the last
/// accepted update.
#[derive(Debug)]
pub struct AppState {
    /// The monitoring engine.
    pub monitor: Monitor,
    /// Latest beacon and alarm lists pushed by the engine.
    pub status: Arc<WatchStatusSink>,
    /// Where configuration updates are persisted.
    pub config_path: PathBuf,
}

impl AppState {
    /// Assemble the engine around the given collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: MonitorConfig,
        config_path: impl Into<PathBuf>,
        registry: Arc<dyn BeaconRegistry>,
        scanner: Arc<dyn RadioScanner>,
        alarm_sink: Arc<dyn AlarmSink>,
    ) -> Self {
        let status = Arc::new(WatchStatusSink::new());
        let publisher = StatusPublisher::spawn(status.clone());
        let monitor = Monitor::new(
            registry,
            scanner,
            alarm_sink,
            publisher,
            ConfigStore::new(config),
        );
        Self {
            monitor,
            status,
            config_path: config_path.into(),
        }
    }

    /// Wrap into the shared handle used by the router.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// The runtime configuration store.
    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        self.monitor.config()
    }

    /// Path of the configuration file.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Persist the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_config(&self) -> veille_core::ConfigResult<()> {
        self.config().get().save(&self.config_path)
    }
}
