//! Configuration API endpoints.
//!
//! Reads and updates the monitoring tunables. Accepted updates take effect
//! immediately (threshold and timeout changes re-evaluate every beacon) and
//! are written back to the configuration file.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use veille_core::{ConfigChange, MonitorConfig, MonitorPhase};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the config router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_config).put(update_config))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Partial configuration update. Absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "distance_threshold_meters": 8.0,
    "alarm_volume_percent": 60
}))]
pub struct UpdateConfigRequest {
    /// Distance above which a beacon is out of range, in meters.
    pub distance_threshold_meters: Option<f64>,
    /// Silence after which a beacon's signal is lost, in milliseconds.
    pub signal_loss_timeout_millis: Option<u64>,
    /// Period of the timeout sweep, in milliseconds.
    pub sweep_interval_millis: Option<u64>,
    /// Number of raw readings averaged per beacon.
    pub smoothing_window_size: Option<usize>,
    /// Environmental attenuation factor.
    pub path_loss_exponent: Option<f64>,
    /// Fallback reference signal at one meter, in dBm.
    pub default_reference_signal_at_1m: Option<i16>,
    /// Readings at or below this level give no distance.
    pub minimum_usable_signal: Option<i16>,
    /// Mute the alarm sound.
    pub is_silenced: Option<bool>,
    /// Alarm volume (0-100).
    pub alarm_volume_percent: Option<u8>,
}

impl UpdateConfigRequest {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(v) = self.distance_threshold_meters {
            config.distance_threshold_meters = v;
        }
        if let Some(v) = self.signal_loss_timeout_millis {
            config.signal_loss_timeout_millis = v;
        }
        if let Some(v) = self.sweep_interval_millis {
            config.sweep_interval_millis = v;
        }
        if let Some(v) = self.smoothing_window_size {
            config.smoothing_window_size = v;
        }
        if let Some(v) = self.path_loss_exponent {
            config.path_loss_exponent = v;
        }
        if let Some(v) = self.default_reference_signal_at_1m {
            config.default_reference_signal_at_1m = v;
        }
        if let Some(v) = self.minimum_usable_signal {
            config.minimum_usable_signal = v;
        }
        if let Some(v) = self.is_silenced {
            config.is_silenced = v;
        }
        if let Some(v) = self.alarm_volume_percent {
            config.alarm_volume_percent = v;
        }
    }
}

/// Response after updating the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateConfigResponse {
    /// Whether the update was accepted and saved.
    pub success: bool,

    /// Configuration now in effect.
    pub config: MonitorConfig,

    /// Whether beacons were re-evaluated against new limits.
    pub reevaluated: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get current configuration.
#[utoipa::path(
    get,
    path = "/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get current configuration",
    description = "Returns the monitoring tunables currently in effect.",
    responses(
        (status = 200, description = "Configuration retrieved", body = MonitorConfig)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<MonitorConfig> {
    let config = state.read().await.config().get();
    Json((*config).clone())
}

/// Update configuration.
#[utoipa::path(
    put,
    path = "/config",
    tag = "config",
    operation_id = "updateConfig",
    summary = "Update configuration",
    description = "Applies the given fields, validates the result and saves it. \
        A threshold or timeout change re-evaluates every beacon at once; a \
        silence or volume change applies to the alarm sound at once.",
    request_body = UpdateConfigRequest,
    responses(
        (status = 200, description = "Configuration updated", body = UpdateConfigResponse),
        (status = 422, description = "A value is out of range", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_config(
    State(state): State<SharedState>,
    Json(request): Json<UpdateConfigRequest>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let (config, change) = apply_update(&state, |config| request.apply(config)).await?;

    Ok(Json(UpdateConfigResponse {
        success: true,
        config: (*config).clone(),
        reevaluated: change.needs_sweep(),
    }))
}

/// Apply `f` to the configuration, persist it and propagate the change.
///
/// While monitoring is active the session's configuration watcher reacts to
/// the change; otherwise silence and volume changes are handed to the alarm
/// coordinator here so a running test sound follows them.
pub(crate) async fn apply_update<F>(
    state: &SharedState,
    f: F,
) -> ApiResult<(Arc<MonitorConfig>, ConfigChange)>
where
    F: FnOnce(&mut MonitorConfig),
{
    let state_guard = state.write().await;
    let (config, change) = state_guard.config().update(f)?;

    state_guard.save_config().map_err(|e| ApiError::InternalError {
        error_code: "CONFIG_SAVE_FAILED".to_string(),
        message: "Failed to save configuration".to_string(),
        details: Some(e.to_string()),
    })?;

    if !change.is_empty() {
        info!(?change, "Configuration updated");
        if state_guard.monitor.phase() != MonitorPhase::Active {
            state_guard
                .monitor
                .alarm_coordinator()
                .on_config_change(change, &config)
                .await;
        }
    }
    Ok((config, change))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let request: UpdateConfigRequest =
            serde_json::from_str(r#"{"distance_threshold_meters": 8.0}"#).unwrap();
        let mut config = MonitorConfig::default();
        request.apply(&mut config);

        assert!((config.distance_threshold_meters - 8.0).abs() < f64::EPSILON);
        assert_eq!(config.alarm_volume_percent, 80);
        assert_eq!(config.signal_loss_timeout_millis, 20_000);
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let mut config = MonitorConfig::default();
        UpdateConfigRequest::default().apply(&mut config);
        assert_eq!(config, MonitorConfig::default());
    }
}
