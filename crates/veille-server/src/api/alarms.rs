//! Alarm API endpoints.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use veille_core::{AlarmEvent, DEFAULT_TEST_SOUND_DURATION};

use crate::api::config::apply_update;
use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Longest test sound a client may request.
const MAX_TEST_SOUND_MILLIS: u64 = 30_000;

/// Creates the alarms router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_alarms))
        .route("/silence", put(set_silenced))
        .route("/test", post(test_sound))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Open alarms and sound state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AlarmsResponse {
    /// Open alarms, newest first.
    pub alarms: Vec<AlarmEvent>,

    /// Whether alarm sound is muted.
    pub is_silenced: bool,

    /// Whether the alarm sound is playing.
    pub is_playing: bool,
}

/// Request to mute or unmute the alarm sound.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "silenced": true }))]
pub struct SilenceRequest {
    /// `true` to mute, `false` to unmute.
    pub silenced: bool,
}

/// Test sound parameters.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TestSoundQuery {
    /// Playback duration in milliseconds (default 3000, at most 30000).
    pub duration_ms: Option<u64>,
}

/// Response after starting a test sound.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestSoundResponse {
    /// Whether playback started.
    pub success: bool,

    /// How long the sound plays, in milliseconds.
    #[schema(example = 3000)]
    pub duration_ms: u64,

    /// Volume used.
    #[schema(example = 80)]
    pub volume_percent: u8,
}

// ============================================================================
// Handlers
// ============================================================================

/// List open alarms.
#[utoipa::path(
    get,
    path = "/alarms",
    tag = "alarms",
    operation_id = "listAlarms",
    summary = "List open alarms",
    description = "Returns every open alarm (signal lost, out of range), newest \
        first, along with the silence flag and whether sound is playing.",
    responses(
        (status = 200, description = "Open alarms", body = AlarmsResponse)
    )
)]
pub async fn list_alarms(State(state): State<SharedState>) -> Json<AlarmsResponse> {
    Json(alarms_response(&state).await)
}

/// Mute or unmute the alarm sound.
#[utoipa::path(
    put,
    path = "/alarms/silence",
    tag = "alarms",
    operation_id = "setSilenced",
    summary = "Mute or unmute alarms",
    description = "Muting stops the sound at once but keeps every open alarm. \
        Unmuting resumes the sound if alarms are still open. The setting is \
        saved with the configuration.",
    request_body = SilenceRequest,
    responses(
        (status = 200, description = "Silence flag updated", body = AlarmsResponse)
    )
)]
pub async fn set_silenced(
    State(state): State<SharedState>,
    Json(request): Json<SilenceRequest>,
) -> ApiResult<Json<AlarmsResponse>> {
    apply_update(&state, |config| config.is_silenced = request.silenced).await?;
    Ok(Json(alarms_response(&state).await))
}

/// Play a test alarm.
#[utoipa::path(
    post,
    path = "/alarms/test",
    tag = "alarms",
    operation_id = "testAlarmSound",
    summary = "Play a test alarm",
    description = "Plays the alarm at the configured volume for a short time, \
        even when muted. Afterwards the sound stops unless unmuted alarms are \
        open.",
    params(TestSoundQuery),
    responses(
        (status = 200, description = "Test sound started", body = TestSoundResponse),
        (status = 400, description = "Duration out of range"),
        (status = 500, description = "Alarm sink failed")
    )
)]
pub async fn test_sound(
    State(state): State<SharedState>,
    Query(query): Query<TestSoundQuery>,
) -> ApiResult<Json<TestSoundResponse>> {
    let duration = match query.duration_ms {
        None => DEFAULT_TEST_SOUND_DURATION,
        Some(ms) if (1..=MAX_TEST_SOUND_MILLIS).contains(&ms) => Duration::from_millis(ms),
        Some(_) => {
            return Err(ApiError::BadRequest {
                error_code: "INVALID_DURATION".to_string(),
                message: format!("duration_ms must be between 1 and {MAX_TEST_SOUND_MILLIS}"),
            })
        }
    };

    let state_guard = state.read().await;
    state_guard.monitor.alarm_coordinator().test_sound(duration)?;

    Ok(Json(TestSoundResponse {
        success: true,
        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(MAX_TEST_SOUND_MILLIS),
        volume_percent: state_guard.config().get().alarm_volume_percent,
    }))
}

async fn alarms_response(state: &SharedState) -> AlarmsResponse {
    let state_guard = state.read().await;
    let coordinator = state_guard.monitor.alarm_coordinator();
    AlarmsResponse {
        alarms: coordinator.active_alarms().await,
        is_silenced: state_guard.config().get().is_silenced,
        is_playing: coordinator.is_playing(),
    }
}
