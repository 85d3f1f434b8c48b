//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use veille_core::MonitorPhase;

use crate::state::SharedState;

/// Liveness report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "monitoring": "active"
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Crate version of the running server.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Current monitoring phase.
    pub monitoring: MonitorPhase,
}

/// Routes under `/health`.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Report liveness and the monitoring phase.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns the service version and the monitoring phase. The \
        service is healthy even when monitoring is idle.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let monitoring = state.read().await.monitor.phase();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        monitoring,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_snake_case() {
        let value = serde_json::to_value(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            monitoring: MonitorPhase::Starting,
        })
        .unwrap();
        assert_eq!(value["monitoring"], "starting");
        assert_eq!(value["status"], "ok");
    }
}
