//! HTTP API routes and handlers.
//!
//! - `monitoring` - Start, stop and status of the scan session
//! - `beacons` - Tracked beacon states
//! - `alarms` - Open alarms, mute and test sound
//! - `events` - Live beacon and alarm stream
//! - `config` - Monitoring tunables
//! - `health` - Service health
//! - `openapi` - OpenAPI specification

use axum::routing::get;
use axum::Router;

use crate::state::SharedState;

pub mod alarms;
pub mod beacons;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod monitoring;
pub mod openapi;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router.
///
/// ```text
/// /health                    - Health check
/// /api
/// ├── /monitoring            - Status, /start, /stop
/// ├── /beacons               - Tracked beacons, /{address}
/// ├── /alarms                - Open alarms, /silence, /test
/// ├── /config                - Get and update tunables
/// ├── /events                - Server-sent beacon and alarm updates
/// └── /openapi.json          - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/monitoring", monitoring::router())
                .nest("/beacons", beacons::router())
                .nest("/alarms", alarms::router())
                .nest("/config", config::router())
                .nest("/events", events::router()),
        )
        .with_state(state)
}
