//! Unified error types for the veille core library.
//!
//! [`VeilleError`] covers every failure mode of the monitoring engine and its
//! collaborators. Configuration loading has its own [`ConfigError`](crate::config::ConfigError)
//! (see [`crate::config`]) which converts into it.
//!
//! None of these errors is fatal to the process: the worst outcome is that
//! monitoring stops and has to be started again. Weak or zero signal readings
//! are not errors at all; they simply produce no distance estimate.
//!
//! # Example
//!
//! ```rust
//! use veille_core::error::{Result, VeilleError};
//!
//! fn start_scan(authorized: bool) -> Result<()> {
//!     if !authorized {
//!         return Err(VeilleError::AccessDenied("scan permission missing".into()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all veille operations.
#[derive(Debug, Error)]
pub enum VeilleError {
    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// The radio scan may not start because authorization is missing.
    #[error("Bluetooth scan not authorized: {0}. Grant scan permission and start monitoring again.")]
    AccessDenied(String),

    /// No usable radio adapter (absent, disabled or powered off).
    #[error("Bluetooth adapter unavailable: {0}. Ensure the adapter is present and powered on.")]
    RadioUnavailable(String),

    /// The platform reported a failure while scanning.
    #[error("Bluetooth scan failed with code {code}")]
    ScanFailure {
        /// Platform specific failure code.
        code: i32,
    },

    /// Monitoring is already starting or active.
    #[error("Monitoring is already active")]
    ScanAlreadyActive,

    /// Monitoring is not running.
    #[error("Monitoring is not active")]
    MonitoringNotActive,

    // =========================================================================
    // BEACON ERRORS
    // =========================================================================
    /// A beacon address is not in `XX:XX:XX:XX:XX:XX` form.
    #[error("Invalid beacon address: '{0}'. Expected format XX:XX:XX:XX:XX:XX.")]
    InvalidAddress(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // COLLABORATOR ERRORS
    // =========================================================================
    /// Reading or writing persisted data failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// An alarm or status sink rejected a call.
    #[error("Sink failure: {0}")]
    SinkFailure(String),

    /// The state store task is no longer running.
    #[error("Monitoring engine stopped")]
    EngineStopped,

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for veille operations.
pub type Result<T> = std::result::Result<T, VeilleError>;

impl VeilleError {
    /// Returns `true` if this error comes from the radio scanner.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied(_) | Self::RadioUnavailable(_) | Self::ScanFailure { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O, persistence or sinks.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::SinkFailure(_) | Self::IoError(_)
        )
    }

    /// Returns `true` if simply starting monitoring again may succeed.
    ///
    /// Authorization and adapter problems need the user to act first.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ScanFailure { .. } | Self::SinkFailure(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidAddress(_) => 400,
            Self::AccessDenied(_) => 403,
            Self::ConfigNotFound(_) => 404,
            Self::ScanAlreadyActive | Self::MonitoringNotActive => 409,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
            Self::PersistenceError(_)
            | Self::SinkFailure(_)
            | Self::EngineStopped
            | Self::IoError(_) => 500,
            Self::RadioUnavailable(_) | Self::ScanFailure { .. } => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::ScanFailure { .. } => "SCAN_FAILURE",
            Self::ScanAlreadyActive => "SCAN_ALREADY_ACTIVE",
            Self::MonitoringNotActive => "MONITORING_NOT_ACTIVE",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::SinkFailure(_) => "SINK_FAILURE",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for VeilleError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Write { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::Validation { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::NoConfigDir => {
                Self::PersistenceError("Cannot determine config directory".into())
            }
        }
    }
}

impl From<serde_json::Error> for VeilleError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
