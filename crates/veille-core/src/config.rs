//! Monitoring configuration management.
//!
//! Handles loading, saving, and validating the tunables the engine reads:
//! - Distance threshold and signal loss timeout
//! - Smoothing window and path-loss model parameters
//! - Alarm volume and silence flag
//!
//! At runtime the configuration lives in a [`ConfigStore`]. Components take an
//! immutable snapshot at the start of each processing step and observe changes
//! through a `watch` channel, so a concurrent update never tears a step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use utoipa::ToSchema;

/// Default configuration file location on the target device.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/veille/config.toml";

/// Prefix for environment variable overrides (`VEILLE_DISTANCE_THRESHOLD_METERS`, ...).
pub const ENV_PREFIX: &str = "VEILLE";

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The layered sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Writing the configuration file failed.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// No platform configuration directory could be determined.
    #[error("Cannot determine config directory")]
    NoConfigDir,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Tunables of the monitoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct MonitorConfig {
    /// Distance above which a beacon is out of range, in meters.
    #[schema(example = 30.0)]
    pub distance_threshold_meters: f64,

    /// Silence after which a beacon's signal is considered lost.
    #[schema(example = 20000)]
    pub signal_loss_timeout_millis: u64,

    /// Period of the timeout sweep.
    #[schema(example = 5000)]
    pub sweep_interval_millis: u64,

    /// Number of raw readings averaged per beacon.
    #[schema(example = 5)]
    pub smoothing_window_size: usize,

    /// Environmental attenuation factor of the log-distance model.
    #[schema(example = 2.0)]
    pub path_loss_exponent: f64,

    /// Reference signal at one meter used when nothing better is known.
    #[schema(example = -59)]
    pub default_reference_signal_at_1m: i16,

    /// Readings at or below this level give no distance estimate.
    #[schema(example = -85)]
    pub minimum_usable_signal: i16,

    /// Whether alarm sound is muted.
    pub is_silenced: bool,

    /// Alarm playback volume (0-100).
    #[schema(example = 80, minimum = 0, maximum = 100)]
    pub alarm_volume_percent: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            distance_threshold_meters: 30.0,
            signal_loss_timeout_millis: 20_000,
            sweep_interval_millis: 5_000,
            smoothing_window_size: 5,
            path_loss_exponent: 2.0,
            default_reference_signal_at_1m: -59,
            minimum_usable_signal: -85,
            is_silenced: false,
            alarm_volume_percent: 80,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `path` (optional) layered under `VEILLE_*`
    /// environment variables, then validate it.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let loaded: Self = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(loaded)
    }

    /// Save configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Check every field for a usable value.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.distance_threshold_meters.is_finite() && self.distance_threshold_meters > 0.0) {
            return Err(invalid(
                "distance_threshold_meters",
                "must be a positive number of meters",
            ));
        }
        if self.signal_loss_timeout_millis == 0 {
            return Err(invalid("signal_loss_timeout_millis", "must be greater than 0"));
        }
        if self.sweep_interval_millis == 0 {
            return Err(invalid("sweep_interval_millis", "must be greater than 0"));
        }
        if self.smoothing_window_size == 0 {
            return Err(invalid("smoothing_window_size", "must hold at least one sample"));
        }
        if !(self.path_loss_exponent.is_finite() && self.path_loss_exponent > 0.0) {
            return Err(invalid("path_loss_exponent", "must be a positive number"));
        }
        if !(-127..0).contains(&self.default_reference_signal_at_1m) {
            return Err(invalid(
                "default_reference_signal_at_1m",
                "must be between -127 and -1 dBm",
            ));
        }
        if !(-127..=0).contains(&self.minimum_usable_signal) {
            return Err(invalid(
                "minimum_usable_signal",
                "must be between -127 and 0 dBm",
            ));
        }
        if self.alarm_volume_percent > 100 {
            return Err(invalid("alarm_volume_percent", "must be between 0 and 100"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Validation {
        field,
        message: message.to_string(),
    }
}

/// Get the configuration file path for this platform.
///
/// On the device: `/etc/veille/config.toml`.
/// For development: `~/.config/veille/config.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if no home directory can be found.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from(DEFAULT_CONFIG_PATH))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs =
            directories::ProjectDirs::from("", "", "veille").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

/// Which observed settings differ between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChange {
    /// Distance threshold changed.
    pub threshold: bool,
    /// Signal loss timeout changed.
    pub timeout: bool,
    /// Alarm volume changed.
    pub volume: bool,
    /// Silence flag changed.
    pub silence: bool,
}

impl ConfigChange {
    /// Compare two snapshots.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn between(old: &MonitorConfig, new: &MonitorConfig) -> Self {
        Self {
            threshold: old.distance_threshold_meters != new.distance_threshold_meters,
            timeout: old.signal_loss_timeout_millis != new.signal_loss_timeout_millis,
            volume: old.alarm_volume_percent != new.alarm_volume_percent,
            silence: old.is_silenced != new.is_silenced,
        }
    }

    /// Whether beacon states need a fresh evaluation.
    #[must_use]
    pub const fn needs_sweep(&self) -> bool {
        self.threshold || self.timeout
    }

    /// Whether anything observed changed at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.threshold || self.timeout || self.volume || self.silence)
    }
}

/// Runtime holder of the current configuration.
///
/// Cloning is cheap; all clones share one `watch` channel.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<Arc<MonitorConfig>>>,
}

impl ConfigStore {
    /// Create a store holding `initial`.
    #[must_use]
    pub fn new(initial: MonitorConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Immutable snapshot of the current configuration.
    #[must_use]
    pub fn get(&self) -> Arc<MonitorConfig> {
        self.tx.borrow().clone()
    }

    /// Apply `f` to a copy of the configuration, validate the result and
    /// publish it. Returns the new snapshot and what changed.
    ///
    /// Read, modify and publish happen under the channel's write lock, so
    /// concurrent updates never overwrite each other. `f` must not call back
    /// into this store.
    ///
    /// # Errors
    ///
    /// Returns a validation error and leaves the configuration untouched if
    /// the updated value is invalid.
    pub fn update<F>(&self, f: F) -> ConfigResult<(Arc<MonitorConfig>, ConfigChange)>
    where
        F: FnOnce(&mut MonitorConfig),
    {
        let mut outcome = None;
        self.tx.send_if_modified(|current| {
            let mut next = (**current).clone();
            f(&mut next);
            if let Err(e) = next.validate() {
                outcome = Some(Err(e));
                return false;
            }

            let change = ConfigChange::between(&**current, &next);
            *current = Arc::new(next);
            outcome = Some(Ok((current.clone(), change)));
            true
        });

        let (next, change) = outcome.unwrap_or_else(|| Ok((self.get(), ConfigChange::default())))?;
        debug!(?change, "Configuration updated");
        Ok((next, change))
    }

    /// Subscribe to configuration snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<MonitorConfig>> {
        self.tx.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
