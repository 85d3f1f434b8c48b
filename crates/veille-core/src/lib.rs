//! # veille-core
//!
//! Core monitoring engine for the veille beacon proximity tracker.
//!
//! This crate provides:
//! - Per-beacon signal smoothing and distance estimation
//! - A beacon state store driven by advertisements and a periodic timeout sweep
//! - Alarm coordination (signal lost, out of range) with silence and volume control
//! - Scan lifecycle management on top of a pluggable radio scanner
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`monitor`] - Scan lifecycle controller; owns a monitoring session and its tasks
//! - [`store`] - Beacon state store (single-owner task) and its state machine
//! - [`ingestor`] - Advertisement filtering, smoothing and distance estimation
//! - [`sweeper`] - Periodic signal loss detection
//! - [`alarm`] - Open alarm bookkeeping and alarm sound control
//! - [`smoother`] - Rolling-window RSSI smoothing
//! - [`estimator`] - Log-distance path loss model
//! - [`scanner`] - Radio scanner seam and mock scanner
//! - [`bluetooth`] - BlueZ scanner (feature `bluetooth`)
//! - [`registry`] - Enrolled beacon registry backed by a JSON file
//! - [`sink`] - Alarm sound and status sinks
//! - [`config`] - Configuration loading, saving, validation and runtime updates
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod alarm;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod estimator;
pub mod ingestor;
pub mod monitor;
pub mod registry;
pub mod scanner;
pub mod sink;
pub mod smoother;
pub mod store;
pub mod sweeper;
pub mod types;

// Re-export primary types for convenience
pub use alarm::{AlarmCoordinator, DEFAULT_TEST_SOUND_DURATION};
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerScanner;
pub use config::{
    default_config_path, ConfigChange, ConfigError, ConfigResult, ConfigStore, MonitorConfig,
};
pub use error::{Result, VeilleError};
pub use estimator::PathLossModel;
pub use ingestor::AdvertisementIngestor;
pub use monitor::{Monitor, MonitorPhase, MonitorStatus, StopReason};
pub use registry::{
    default_data_dir, default_registry_path, BeaconRegistry, InMemoryRegistry, JsonBeaconRegistry,
};
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use scanner::{MockRadioScanner, MockStartFailure};
pub use scanner::{RadioScanner, ScanEvent};
pub use sink::{AlarmSink, LogAlarmSink, StatusPublisher, StatusSink, WatchStatusSink};
pub use smoother::SignalSmoother;
pub use store::{BeaconStateStore, SignalUpdate, Thresholds};
pub use sweeper::TimeoutSweeper;
pub use types::{
    is_valid_mac_address, Advertisement, AlarmEvent, AlarmKind, BeaconAddress,
    BeaconRuntimeState, EnrolledBeacon, Transition, TransitionEdge,
};
