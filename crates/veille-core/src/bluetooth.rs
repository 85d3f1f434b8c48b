//! Bluetooth Low Energy scanning through BlueZ.
//!
//! [`BluerScanner`] runs an LE discovery session on the default adapter and
//! turns every device report (new device or changed signal strength) into an
//! [`Advertisement`]. Filtering on enrolled beacons happens downstream.

use async_trait::async_trait;
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, ErrorKind, Session,
};
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, VeilleError};
use crate::scanner::{RadioScanner, ScanEvent};
use crate::types::{Advertisement, BeaconAddress};

/// Failure code reported when BlueZ ends discovery on its own.
pub const DISCOVERY_ENDED_CODE: i32 = -1;

struct ScanTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Scanner backed by the system's BlueZ daemon.
pub struct BluerScanner {
    adapter: Adapter,
    task: Mutex<Option<ScanTask>>,
    // Keeps the D-Bus connection open for the adapter's lifetime.
    _session: Session,
}

impl std::fmt::Debug for BluerScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluerScanner")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BluerScanner {
    /// Connect to BlueZ and pick the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::RadioUnavailable`] if BlueZ or the adapter
    /// cannot be reached.
    pub async fn new() -> Result<Self> {
        let session = Session::new().await.map_err(map_bluer_error)?;
        let adapter = session.default_adapter().await.map_err(map_bluer_error)?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");
        Ok(Self {
            adapter,
            task: Mutex::new(None),
            _session: session,
        })
    }

    async fn run(
        adapter: Adapter,
        events: mpsc::Sender<ScanEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let discovery = match adapter.discover_devices_with_changes().await {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(error = %e, "Bluetooth discovery could not start");
                let _ = events
                    .send(ScanEvent::Failed {
                        code: DISCOVERY_ENDED_CODE,
                    })
                    .await;
                return;
            }
        };
        let mut discovery = Box::pin(discovery);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Bluetooth discovery shutting down");
                    return;
                }
                event = discovery.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if let Some(advertisement) = read_advertisement(&adapter, address).await {
                            if events.send(ScanEvent::Advertisement(advertisement)).await.is_err() {
                                debug!("Scan event receiver dropped");
                                return;
                            }
                        }
                    }
                    Some(AdapterEvent::DeviceRemoved(address)) => {
                        trace!(%address, "Device removed");
                    }
                    Some(AdapterEvent::PropertyChanged(property)) => {
                        trace!(?property, "Adapter property changed");
                    }
                    None => {
                        warn!("Bluetooth discovery ended unexpectedly");
                        let _ = events
                            .send(ScanEvent::Failed {
                                code: DISCOVERY_ENDED_CODE,
                            })
                            .await;
                        return;
                    }
                },
            }
        }
    }
}

/// Read the current signal of a reported device.
///
/// Devices without a signal reading (cached, not currently in range) are
/// skipped.
async fn read_advertisement(adapter: &Adapter, address: Address) -> Option<Advertisement> {
    let device = adapter.device(address).ok()?;
    let rssi = match device.rssi().await {
        Ok(Some(rssi)) => rssi,
        Ok(None) => return None,
        Err(e) => {
            trace!(%address, error = %e, "No signal reading");
            return None;
        }
    };
    let tx_power = device.tx_power().await.ok().flatten();
    let name = device.name().await.ok().flatten();

    Some(Advertisement {
        address: BeaconAddress::new(address.to_string()),
        rssi,
        tx_power,
        name,
    })
}

fn map_bluer_error(e: bluer::Error) -> VeilleError {
    match e.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => VeilleError::AccessDenied(e.message),
        _ => VeilleError::RadioUnavailable(e.to_string()),
    }
}

#[async_trait]
impl RadioScanner for BluerScanner {
    async fn start(&self, events: mpsc::Sender<ScanEvent>) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(VeilleError::ScanAlreadyActive);
        }

        if !self.adapter.is_powered().await.map_err(map_bluer_error)? {
            return Err(VeilleError::RadioUnavailable(format!(
                "adapter {} is powered off",
                self.adapter.name()
            )));
        }
        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..DiscoveryFilter::default()
            })
            .await
            .map_err(map_bluer_error)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run(self.adapter.clone(), events, shutdown_rx));
        *task = Some(ScanTask { shutdown, handle });
        info!(adapter = self.adapter.name(), "Bluetooth scan started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Bluetooth discovery task panicked");
        }
        info!(adapter = self.adapter.name(), "Bluetooth scan stopped");
        Ok(())
    }
}
