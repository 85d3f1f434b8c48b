//! Beacon state API endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use veille_core::{BeaconAddress, BeaconRuntimeState};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the beacons router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_beacons))
        .route("/{address}", get(get_beacon))
}

/// Tracked beacons response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconsResponse {
    /// Runtime state of every tracked beacon, ordered by address.
    pub beacons: Vec<BeaconRuntimeState>,

    /// Number of beacons with at least one open alarm kind.
    #[schema(example = 1)]
    pub alarming: usize,
}

/// List tracked beacons.
#[utoipa::path(
    get,
    path = "/beacons",
    tag = "beacons",
    operation_id = "listBeacons",
    summary = "List tracked beacons",
    description = "Returns the runtime state of every beacon tracked by the \
        current (or last) monitoring session: smoothed signal, estimated \
        distance, last sighting and alarm flags.",
    responses(
        (status = 200, description = "Beacon states", body = BeaconsResponse)
    )
)]
pub async fn list_beacons(State(state): State<SharedState>) -> ApiResult<Json<BeaconsResponse>> {
    let beacons = state.read().await.monitor.beacons().await?;
    let alarming = beacons
        .iter()
        .filter(|beacon| !beacon.active_alarm_kinds.is_empty())
        .count();
    Ok(Json(BeaconsResponse { beacons, alarming }))
}

/// Get one tracked beacon.
#[utoipa::path(
    get,
    path = "/beacons/{address}",
    tag = "beacons",
    operation_id = "getBeacon",
    summary = "Get one tracked beacon",
    params(
        ("address" = String, Path, description = "Beacon address (XX:XX:XX:XX:XX:XX)")
    ),
    responses(
        (status = 200, description = "Beacon state", body = BeaconRuntimeState),
        (status = 400, description = "Malformed address"),
        (status = 404, description = "Beacon not tracked")
    )
)]
pub async fn get_beacon(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<BeaconRuntimeState>> {
    let address = BeaconAddress::new(&address);
    if !address.is_valid() {
        return Err(ApiError::BadRequest {
            error_code: "INVALID_ADDRESS".to_string(),
            message: format!("Invalid beacon address: '{address}'. Expected XX:XX:XX:XX:XX:XX."),
        });
    }

    let beacon = state.read().await.monitor.beacon(address.clone()).await?;
    beacon.map(Json).ok_or_else(|| ApiError::NotFound {
        error_code: "BEACON_NOT_TRACKED".to_string(),
        message: format!("Beacon {address} is not tracked"),
    })
}
