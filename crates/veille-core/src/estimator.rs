//! Distance estimation from signal strength.
//!
//! Uses the log-distance path loss model:
//!
//! ```text
//! distance = 10 ^ ((reference_at_1m - rssi) / (10 * n))
//! ```
//!
//! where `n` is the path-loss exponent (about 2.0 in free space, 2.7 to 4.0
//! indoors). Readings that are zero or at/below the usable floor give no
//! estimate: far-away beacons produce signals too noisy to trust.

use crate::config::MonitorConfig;

/// Reference signal at one meter when neither the advertisement nor the
/// registry provides one.
pub const DEFAULT_REFERENCE_SIGNAL_AT_1M: i16 = -59;

/// Readings at or below this level produce no distance.
pub const DEFAULT_MINIMUM_USABLE_SIGNAL: i16 = -85;

/// Model parameters for [`estimate`], snapshotted from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    /// Environmental attenuation factor.
    pub path_loss_exponent: f64,
    /// Weakest reading still trusted.
    pub minimum_usable_signal: i16,
    /// Fallback reference signal at one meter.
    pub default_reference_signal_at_1m: i16,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            path_loss_exponent: 2.0,
            minimum_usable_signal: DEFAULT_MINIMUM_USABLE_SIGNAL,
            default_reference_signal_at_1m: DEFAULT_REFERENCE_SIGNAL_AT_1M,
        }
    }
}

impl From<&MonitorConfig> for PathLossModel {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            path_loss_exponent: config.path_loss_exponent,
            minimum_usable_signal: config.minimum_usable_signal,
            default_reference_signal_at_1m: config.default_reference_signal_at_1m,
        }
    }
}

impl PathLossModel {
    /// Estimate the distance in meters for a smoothed reading.
    #[must_use]
    pub fn estimate(&self, smoothed_signal: i16, reference_signal_at_1m: i16) -> Option<f64> {
        if smoothed_signal == 0 || smoothed_signal <= self.minimum_usable_signal {
            return None;
        }
        Some(estimate(
            smoothed_signal,
            reference_signal_at_1m,
            self.path_loss_exponent,
        ))
    }

    /// Pick the reference signal: advertised, then calibrated, then default.
    #[must_use]
    pub fn reference_signal(&self, advertised: Option<i16>, calibrated: Option<i16>) -> i16 {
        resolve_reference_signal(advertised, calibrated, self.default_reference_signal_at_1m)
    }
}

/// Log-distance model, rounded to two decimals.
///
/// Callers are expected to have filtered unusable readings (see
/// [`PathLossModel::estimate`]).
#[must_use]
pub fn estimate(smoothed_signal: i16, reference_signal_at_1m: i16, path_loss_exponent: f64) -> f64 {
    let attenuation = i32::from(reference_signal_at_1m) - i32::from(smoothed_signal);
    let exponent = f64::from(attenuation) / (10.0 * path_loss_exponent);
    round_to_centimeters(10f64.powf(exponent))
}

/// Resolution order for the one-meter reference.
#[must_use]
pub fn resolve_reference_signal(
    advertised: Option<i16>,
    calibrated: Option<i16>,
    default: i16,
) -> i16 {
    advertised.or(calibrated).unwrap_or(default)
}

fn round_to_centimeters(meters: f64) -> f64 {
    (meters * 100.0).round() / 100.0
}
