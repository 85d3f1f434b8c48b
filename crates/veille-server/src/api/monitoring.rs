//! Monitoring lifecycle API endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use veille_core::MonitorStatus;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the monitoring router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_status))
        .route("/start", post(start_monitoring))
        .route("/stop", post(stop_monitoring))
}

/// Response after starting monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartMonitoringResponse {
    /// Number of enrolled beacons now tracked.
    #[schema(example = 2)]
    pub tracked_beacons: usize,

    /// Monitor status after starting.
    pub status: MonitorStatus,
}

/// Get monitoring status.
#[utoipa::path(
    get,
    path = "/monitoring",
    tag = "monitoring",
    operation_id = "getMonitoringStatus",
    summary = "Get monitoring status",
    description = "Returns the lifecycle phase (idle, starting, active), why \
        the previous session ended, and tracked beacon and open alarm counts.",
    responses(
        (status = 200, description = "Monitoring status", body = MonitorStatus)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> ApiResult<Json<MonitorStatus>> {
    let status = state.read().await.monitor.status().await?;
    Ok(Json(status))
}

/// Start monitoring.
#[utoipa::path(
    post,
    path = "/monitoring/start",
    tag = "monitoring",
    operation_id = "startMonitoring",
    summary = "Start monitoring",
    description = "Seeds the enrolled beacons from the registry and starts the \
        radio scan and the timeout sweep. Nothing is retried on failure: fix \
        the cause (permission, adapter) and call this again.",
    responses(
        (status = 200, description = "Monitoring started", body = StartMonitoringResponse),
        (status = 403, description = "Scan not authorized", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Monitoring already active", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Radio unavailable", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_monitoring(
    State(state): State<SharedState>,
) -> ApiResult<Json<StartMonitoringResponse>> {
    let state_guard = state.read().await;
    let tracked_beacons = state_guard.monitor.start().await?;
    info!(tracked_beacons, "Monitoring started via API");

    Ok(Json(StartMonitoringResponse {
        tracked_beacons,
        status: state_guard.monitor.status().await?,
    }))
}

/// Stop monitoring.
#[utoipa::path(
    post,
    path = "/monitoring/stop",
    tag = "monitoring",
    operation_id = "stopMonitoring",
    summary = "Stop monitoring",
    description = "Stops the timeout sweep and the radio scan, clears open \
        alarms and silences the alarm sound. Beacon states stay readable.",
    responses(
        (status = 200, description = "Monitoring stopped", body = MonitorStatus),
        (status = 409, description = "Monitoring not active", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn stop_monitoring(State(state): State<SharedState>) -> ApiResult<Json<MonitorStatus>> {
    let state_guard = state.read().await;
    state_guard.monitor.stop().await?;
    info!("Monitoring stopped via API");

    Ok(Json(state_guard.monitor.status().await?))
}
