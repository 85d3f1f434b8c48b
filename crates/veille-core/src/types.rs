//! Shared types and OpenAPI schemas.
//!
//! This module contains the types that flow between the engine components and
//! outward to the status sinks: enrolled beacons, advertisements, per-beacon
//! runtime state, alarm events and state transitions.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

static MAC_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));

/// Returns `true` if `address` looks like `XX:XX:XX:XX:XX:XX`.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Stable identifier of a beacon (its Bluetooth address).
///
/// Addresses are normalised to upper case so that `aa:bb:..` and `AA:BB:..`
/// refer to the same beacon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(from = "String", into = "String")]
#[schema(value_type = String, example = "AA:BB:CC:DD:EE:FF")]
pub struct BeaconAddress(String);

impl BeaconAddress {
    /// Create an address, normalising it to upper case.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_uppercase())
    }

    /// Borrow the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is a well-formed MAC address.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_mac_address(&self.0)
    }
}

impl fmt::Display for BeaconAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BeaconAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for BeaconAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<BeaconAddress> for String {
    fn from(value: BeaconAddress) -> Self {
        value.0
    }
}

/// A beacon registered by the user. Owned by the beacon registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EnrolledBeacon {
    /// Bluetooth address of the beacon.
    pub address: BeaconAddress,

    /// Display name assigned at enrollment.
    #[schema(example = "Tag-A")]
    pub name: String,

    /// Calibrated signal strength at one meter, in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = -59)]
    pub reference_signal_at_1m: Option<i16>,
}

impl EnrolledBeacon {
    /// Create an enrolled beacon without calibration.
    pub fn new(address: impl Into<BeaconAddress>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            reference_signal_at_1m: None,
        }
    }

    /// Attach a calibrated reference signal.
    #[must_use]
    pub const fn with_reference_signal(mut self, dbm: i16) -> Self {
        self.reference_signal_at_1m = Some(dbm);
        self
    }
}

/// One detection delivered by the radio scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the transmitting device.
    pub address: BeaconAddress,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Reference power carried in the advertisement, if any.
    pub tx_power: Option<i16>,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl Advertisement {
    /// Advertisement with only an address and a signal reading.
    pub fn new(address: impl Into<BeaconAddress>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            rssi,
            tx_power: None,
            name: None,
        }
    }

    /// Set the advertised reference power.
    #[must_use]
    pub const fn with_tx_power(mut self, tx_power: i16) -> Self {
        self.tx_power = Some(tx_power);
        self
    }
}

/// Kinds of alarm a beacon can raise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// No advertisement received within the loss timeout.
    SignalLost,
    /// Estimated distance above the configured threshold.
    DistanceExceeded,
}

impl AlarmKind {
    /// Human readable message for an alarm of this kind.
    #[must_use]
    pub fn message(self, beacon_name: &str, distance: Option<f64>) -> String {
        match self {
            Self::SignalLost => format!("{beacon_name} - Signal lost!"),
            Self::DistanceExceeded => {
                // Whole meters are enough for a warning message.
                #[allow(clippy::cast_possible_truncation)]
                let meters = distance.unwrap_or_default() as i64;
                format!("{beacon_name} at {meters}m - Out of range!")
            }
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignalLost => f.write_str("signal_lost"),
            Self::DistanceExceeded => f.write_str("distance_exceeded"),
        }
    }
}

/// An open alarm. Created when a beacon enters an alarm condition and
/// removed when it leaves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlarmEvent {
    /// Unique alarm identifier.
    pub id: Uuid,
    /// Beacon that raised the alarm.
    pub address: BeaconAddress,
    /// Display name of the beacon.
    #[schema(example = "Tag-A")]
    pub beacon_name: String,
    /// Alarm kind.
    pub kind: AlarmKind,
    /// Human readable description.
    #[schema(example = "Tag-A - Signal lost!")]
    pub message: String,
    /// When the alarm was raised (UTC).
    pub raised_at: DateTime<Utc>,
}

/// Runtime tracking state of one beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BeaconRuntimeState {
    /// Beacon address.
    pub address: BeaconAddress,

    /// Display name of the beacon.
    #[schema(example = "Tag-A")]
    pub name: String,

    /// Mean of the recent raw readings, in dBm.
    #[schema(example = -62)]
    pub smoothed_signal: Option<i16>,

    /// Estimated distance in meters, absent when the signal is too weak.
    #[schema(example = 1.41)]
    pub estimated_distance: Option<f64>,

    /// Time of the last received advertisement.
    pub last_seen_at: Option<DateTime<Utc>>,

    /// When tracking of this beacon started.
    pub tracked_since: DateTime<Utc>,

    /// No advertisement received within the loss timeout.
    pub signal_lost: bool,

    /// Estimated distance above the threshold.
    pub out_of_range: bool,

    /// Alarm kinds currently open for this beacon.
    pub active_alarm_kinds: BTreeSet<AlarmKind>,
}

impl BeaconRuntimeState {
    /// Fresh state for a beacon that has not been seen yet.
    #[must_use]
    pub fn new(beacon: &EnrolledBeacon, tracked_since: DateTime<Utc>) -> Self {
        Self {
            address: beacon.address.clone(),
            name: beacon.name.clone(),
            smoothed_signal: None,
            estimated_distance: None,
            last_seen_at: None,
            tracked_since,
            signal_lost: false,
            out_of_range: false,
            active_alarm_kinds: BTreeSet::new(),
        }
    }

    /// Timestamp staleness is measured from.
    #[must_use]
    pub fn staleness_reference(&self) -> DateTime<Utc> {
        self.last_seen_at.unwrap_or(self.tracked_since)
    }
}

/// Direction of a state transition on one alarm axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEdge {
    /// The beacon entered the alarm condition.
    Entered,
    /// The beacon left the alarm condition.
    Exited,
}

/// A change of alarm condition computed by the state store.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Beacon address.
    pub address: BeaconAddress,
    /// Display name of the beacon.
    pub name: String,
    /// Axis that changed.
    pub kind: AlarmKind,
    /// Entered or exited.
    pub edge: TransitionEdge,
    /// Alarm message (meaningful for [`TransitionEdge::Entered`]).
    pub message: String,
    /// Position in the store's order of transitions; later transitions
    /// have larger values.
    pub seq: u64,
}

impl Transition {
    pub(crate) fn entered(state: &BeaconRuntimeState, kind: AlarmKind) -> Self {
        Self {
            address: state.address.clone(),
            name: state.name.clone(),
            kind,
            edge: TransitionEdge::Entered,
            message: kind.message(&state.name, state.estimated_distance),
            seq: 0,
        }
    }

    pub(crate) fn exited(state: &BeaconRuntimeState, kind: AlarmKind) -> Self {
        Self {
            address: state.address.clone(),
            name: state.name.clone(),
            kind,
            edge: TransitionEdge::Exited,
            message: String::new(),
            seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_normalised() {
        let address = BeaconAddress::new(" aa:bb:cc:dd:ee:ff ");
        assert_eq!(address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(address, BeaconAddress::from("AA:BB:CC:DD:EE:FF"));
        assert!(address.is_valid());
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("GG:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_alarm_messages() {
        assert_eq!(
            AlarmKind::SignalLost.message("Tag-A", None),
            "Tag-A - Signal lost!"
        );
        assert_eq!(
            AlarmKind::DistanceExceeded.message("Tag-A", Some(12.87)),
            "Tag-A at 12m - Out of range!"
        );
    }

    #[test]
    fn test_address_serializes_as_plain_string() {
        let beacon = EnrolledBeacon::new("aa:bb:cc:dd:ee:ff", "Tag-A").with_reference_signal(-61);
        let json = serde_json::to_string(&beacon).unwrap();
        assert!(json.contains("\"address\":\"AA:BB:CC:DD:EE:FF\""));

        let parsed: EnrolledBeacon = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, beacon);
    }
}
