//! OpenAPI specification for the veille API.
//!
//! Served at `/api/openapi.json` and written to the workspace root by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use utoipa::OpenApi;
use veille_core::{
    AlarmEvent, AlarmKind, BeaconAddress, BeaconRuntimeState, MonitorConfig, MonitorPhase,
    MonitorStatus, StopReason,
};

use super::alarms::{AlarmsResponse, SilenceRequest, TestSoundResponse};
use super::beacons::BeaconsResponse;
use super::config::{UpdateConfigRequest, UpdateConfigResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::monitoring::StartMonitoringResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for veille.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "veille API",
        version = "0.1.0",
        description = r#"
# veille API

veille watches a set of enrolled Bluetooth LE beacons and raises an alarm
when one goes quiet or drifts beyond a distance threshold.

## Overview

1. **Monitoring**: Start and stop the scan session over the enrolled beacons
2. **Beacons**: Smoothed signal, estimated distance and alarm flags per beacon
3. **Alarms**: Open alarms, mute control and a test sound
   (live updates on `/api/events`)
4. **Configuration**: Distance threshold, loss timeout, smoothing and volume

## Alarm rules

- A beacon not heard for longer than the loss timeout raises **signal lost**.
  The alarm clears on the next advertisement.
- A beacon whose estimated distance exceeds the threshold raises
  **out of range**. A beacon with no usable distance is never out of range.
- Muting stops the sound but keeps the alarms open.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local veille server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "monitoring", description = "Monitoring session lifecycle"),
        (name = "beacons", description = "Runtime state of tracked beacons"),
        (name = "alarms", description = "Open alarms and alarm sound control"),
        (name = "config", description = "Monitoring tunables")
    ),
    paths(
        super::health::health_check,
        super::monitoring::get_status,
        super::monitoring::start_monitoring,
        super::monitoring::stop_monitoring,
        super::beacons::list_beacons,
        super::beacons::get_beacon,
        super::alarms::list_alarms,
        super::alarms::set_silenced,
        super::alarms::test_sound,
        super::config::get_config,
        super::config::update_config,
        super::events::stream_events,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            MonitorPhase,
            MonitorStatus,
            StopReason,
            StartMonitoringResponse,
            BeaconAddress,
            BeaconRuntimeState,
            BeaconsResponse,
            AlarmKind,
            AlarmEvent,
            AlarmsResponse,
            SilenceRequest,
            TestSoundResponse,
            MonitorConfig,
            UpdateConfigRequest,
            UpdateConfigResponse,
        )
    )
)]
pub struct ApiDoc;
