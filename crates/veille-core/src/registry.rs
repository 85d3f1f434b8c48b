//! Enrolled beacon registry.
//!
//! The registry is owned outside the engine; the monitor reads it once when a
//! session starts. [`JsonBeaconRegistry`] reads a JSON array of
//! [`EnrolledBeacon`] from the data directory:
//!
//! ```json
//! [
//!   { "address": "AA:BB:CC:DD:EE:01", "name": "Tag-A", "reference_signal_at_1m": -59 },
//!   { "address": "AA:BB:CC:DD:EE:02", "name": "Keys" }
//! ]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, VeilleError};
use crate::types::{BeaconAddress, EnrolledBeacon};

/// File name of the registry inside the data directory.
pub const REGISTRY_FILE_NAME: &str = "beacons.json";

/// Source of enrolled beacons.
#[async_trait]
pub trait BeaconRegistry: Send + Sync {
    /// Every enrolled beacon.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read or holds an invalid
    /// entry.
    async fn list_enrolled(&self) -> Result<Vec<EnrolledBeacon>>;

    /// One enrolled beacon by address.
    ///
    /// # Errors
    ///
    /// See [`BeaconRegistry::list_enrolled`].
    async fn get(&self, address: &BeaconAddress) -> Result<Option<EnrolledBeacon>> {
        Ok(self
            .list_enrolled()
            .await?
            .into_iter()
            .find(|beacon| &beacon.address == address))
    }
}

/// Registry backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonBeaconRegistry {
    path: PathBuf,
}

impl JsonBeaconRegistry {
    /// Registry reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry at the platform default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined.
    pub fn from_default_location() -> Result<Self> {
        Ok(Self::new(default_registry_path()?))
    }

    /// Path of the registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `beacons` to the registry file.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is invalid or the file cannot be
    /// written.
    pub async fn save(&self, beacons: &[EnrolledBeacon]) -> Result<()> {
        validate(beacons)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(beacons)?;
        tokio::fs::write(&self.path, content).await?;
        debug!(path = %self.path.display(), count = beacons.len(), "Registry saved");
        Ok(())
    }
}

#[async_trait]
impl BeaconRegistry for JsonBeaconRegistry {
    async fn list_enrolled(&self) -> Result<Vec<EnrolledBeacon>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Registry file missing, no beacons enrolled");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let beacons: Vec<EnrolledBeacon> = serde_json::from_str(&content)?;
        validate(&beacons)?;
        Ok(dedup(beacons))
    }
}

/// Registry held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    beacons: Vec<EnrolledBeacon>,
}

impl InMemoryRegistry {
    /// Registry holding `beacons`.
    #[must_use]
    pub fn new(beacons: Vec<EnrolledBeacon>) -> Self {
        Self {
            beacons: dedup(beacons),
        }
    }
}

#[async_trait]
impl BeaconRegistry for InMemoryRegistry {
    async fn list_enrolled(&self) -> Result<Vec<EnrolledBeacon>> {
        validate(&self.beacons)?;
        Ok(self.beacons.clone())
    }
}

fn validate(beacons: &[EnrolledBeacon]) -> Result<()> {
    match beacons.iter().find(|beacon| !beacon.address.is_valid()) {
        Some(beacon) => Err(VeilleError::InvalidAddress(beacon.address.to_string())),
        None => Ok(()),
    }
}

/// Keep the first entry of each address.
fn dedup(beacons: Vec<EnrolledBeacon>) -> Vec<EnrolledBeacon> {
    let mut seen = HashSet::new();
    beacons
        .into_iter()
        .filter(|beacon| {
            let first = seen.insert(beacon.address.clone());
            if !first {
                warn!(address = %beacon.address, "Duplicate registry entry ignored");
            }
            first
        })
        .collect()
}

/// Get the default data directory.
///
/// On the device: `/var/lib/veille/`.
/// For development: `~/.local/share/veille/`.
///
/// # Errors
///
/// Returns an error if no home directory can be found.
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/veille"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "veille").ok_or_else(|| {
            VeilleError::PersistenceError("Cannot determine data directory".into())
        })?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Get the default registry file path.
///
/// # Errors
///
/// See [`default_data_dir`].
pub fn default_registry_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(REGISTRY_FILE_NAME))
}
