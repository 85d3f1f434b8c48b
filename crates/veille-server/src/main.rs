//! # veille-server
//!
//! HTTP server for the veille beacon proximity monitor.
//!
//! ## Running
//!
//! ```bash
//! # Development (mock radio, no hardware needed)
//! cargo run --package veille-server
//!
//! # On the device, with BlueZ
//! cargo build --release --package veille-server --features bluetooth
//! VEILLE_ENV=production ./veille-server
//! ```
//!
//! ## Environment
//!
//! - `VEILLE_CONFIG` - configuration file (default: platform config dir)
//! - `VEILLE_BEACONS` - enrolled beacon registry (default: data dir)
//! - `VEILLE_BIND` - listen address (default: `0.0.0.0:3000`)
//! - `VEILLE_AUTOSTART` - set to `0` to leave monitoring idle at boot

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use veille_core::{
    default_config_path, BeaconRegistry, JsonBeaconRegistry, LogAlarmSink, MonitorConfig,
    RadioScanner, VeilleError,
};
use veille_server::api::create_router;
use veille_server::logging::{self, LogMode};
use veille_server::state::AppState;

const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(LogMode::from_env())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting veille-server");

    let config_path = match std::env::var_os("VEILLE_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => default_config_path()?,
    };
    let config = load_or_create_config(&config_path)?;
    info!(path = %config_path.display(), "Configuration loaded");

    let registry: Arc<dyn BeaconRegistry> = match std::env::var_os("VEILLE_BEACONS") {
        Some(path) => Arc::new(JsonBeaconRegistry::new(PathBuf::from(path))),
        None => Arc::new(JsonBeaconRegistry::from_default_location()?),
    };

    let state = AppState::new(
        config,
        config_path,
        registry,
        radio_scanner().await?,
        Arc::new(LogAlarmSink::new()),
    )
    .shared();

    if autostart_enabled() {
        let monitor = state.read().await.monitor.clone();
        match monitor.start().await {
            Ok(count) => info!(tracked_beacons = count, "Monitoring started"),
            // Leave the server up so the cause can be fixed and retried over the API.
            Err(e) => error!(error = %e, code = e.error_code(), "Monitoring failed to start"),
        }
    }

    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var("VEILLE_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()
        .context("parsing VEILLE_BIND")?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let monitor = state.read().await.monitor.clone();
    match monitor.stop().await {
        Ok(()) | Err(VeilleError::MonitoringNotActive) => {}
        Err(e) => warn!(error = %e, "Monitoring did not stop cleanly"),
    }
    info!("veille-server stopped");
    Ok(())
}

/// Load the configuration, writing defaults on first boot.
fn load_or_create_config(path: &std::path::Path) -> anyhow::Result<MonitorConfig> {
    if path.exists() {
        return Ok(MonitorConfig::load(path)?);
    }
    let config = MonitorConfig::default();
    config
        .save(path)
        .with_context(|| format!("writing default configuration to {}", path.display()))?;
    Ok(config)
}

fn autostart_enabled() -> bool {
    !matches!(std::env::var("VEILLE_AUTOSTART").as_deref(), Ok("0" | "false"))
}

#[cfg(feature = "bluetooth")]
async fn radio_scanner() -> anyhow::Result<Arc<dyn RadioScanner>> {
    Ok(Arc::new(veille_core::BluerScanner::new().await?))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn radio_scanner() -> anyhow::Result<Arc<dyn RadioScanner>> {
    warn!("Built without the bluetooth feature; using the mock radio scanner");
    Ok(Arc::new(veille_core::MockRadioScanner::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
