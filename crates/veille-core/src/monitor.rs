//! Scan lifecycle control.
//!
//! [`Monitor`] owns one monitoring session at a time:
//!
//! ```text
//! Idle ── start ──► Starting ── scan running ──► Active
//!   ▲                  │                           │
//!   └── access denied, ┘                           │
//!       radio unavailable                          │
//!   ▲                                              │
//!   └──────────── stop, or scan failure ───────────┘
//! ```
//!
//! While active, three tasks run: ingestion (scan events into the store),
//! the timeout sweeper, and a configuration watcher that re-sweeps on
//! threshold or timeout changes and forwards silence and volume changes to
//! the alarm coordinator.
//!
//! Leaving `Active` always runs the same teardown: stop the sweeper, stop the
//! scan (errors are logged, not returned), make the store inert, then join
//! the remaining tasks.
//!
//! Starting and stopping claim the session slot, then release the lock
//! before talking to the radio. A second start or stop arriving meanwhile
//! is rejected instead of waiting on the adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::alarm::AlarmCoordinator;
use crate::config::{ConfigChange, ConfigStore};
use crate::error::{Result, VeilleError};
use crate::ingestor::AdvertisementIngestor;
use crate::registry::BeaconRegistry;
use crate::scanner::{RadioScanner, SCAN_EVENT_QUEUE_DEPTH};
use crate::sink::{AlarmSink, StatusPublisher};
use crate::store::BeaconStateStore;
use crate::sweeper::TimeoutSweeper;
use crate::types::{AlarmEvent, BeaconAddress, BeaconRuntimeState};

/// Lifecycle phase of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    /// Not monitoring.
    Idle,
    /// Seeding beacons and starting the scan.
    Starting,
    /// Scanning and sweeping.
    Active,
}

/// Why the last session ended (or failed to start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop.
    Requested,
    /// The platform aborted the scan.
    ScanFailure {
        /// Platform failure code.
        code: i32,
    },
    /// Scanning was not authorized.
    AccessDenied,
    /// No usable adapter.
    RadioUnavailable,
    /// Starting failed for another reason.
    StartFailed {
        /// Error description.
        message: String,
    },
}

impl StopReason {
    fn from_start_error(e: &VeilleError) -> Self {
        match e {
            VeilleError::AccessDenied(_) => Self::AccessDenied,
            VeilleError::RadioUnavailable(_) => Self::RadioUnavailable,
            VeilleError::ScanFailure { code } => Self::ScanFailure { code: *code },
            other => Self::StartFailed {
                message: other.to_string(),
            },
        }
    }
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MonitorStatus {
    /// Current phase.
    pub phase: MonitorPhase,
    /// When the current session became active.
    pub active_since: Option<DateTime<Utc>>,
    /// Why the previous session ended.
    pub last_stop_reason: Option<StopReason>,
    /// Number of tracked beacons.
    pub tracked_beacons: usize,
    /// Number of open alarms.
    pub active_alarms: usize,
}

#[derive(Debug, Clone)]
struct PhaseState {
    phase: MonitorPhase,
    active_since: Option<DateTime<Utc>>,
    last_stop_reason: Option<StopReason>,
}

/// Tasks of one active session. Dropping it signals them to exit.
struct Session {
    id: u64,
    shutdown: watch::Sender<bool>,
    sweeper: JoinHandle<()>,
    ingestion: JoinHandle<()>,
    config_watch: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

enum Slot {
    Vacant,
    /// A start or stop owns the slot.
    Changing,
    Running(Session),
}

struct MonitorInner {
    registry: Arc<dyn BeaconRegistry>,
    scanner: Arc<dyn RadioScanner>,
    store: BeaconStateStore,
    alarms: Arc<AlarmCoordinator>,
    config: ConfigStore,
    slot: Mutex<Slot>,
    slot_settled: Notify,
    phase: watch::Sender<PhaseState>,
    next_session_id: AtomicU64,
}

/// Beacon monitoring engine. Cheap to clone.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Assemble the engine. Spawns the state store task, so this must be
    /// called from within a tokio runtime.
    pub fn new(
        registry: Arc<dyn BeaconRegistry>,
        scanner: Arc<dyn RadioScanner>,
        alarm_sink: Arc<dyn AlarmSink>,
        publisher: StatusPublisher,
        config: ConfigStore,
    ) -> Self {
        let store = BeaconStateStore::spawn(publisher.clone());
        let alarms = Arc::new(AlarmCoordinator::new(alarm_sink, config.clone(), publisher));
        let (phase, _) = watch::channel(PhaseState {
            phase: MonitorPhase::Idle,
            active_since: None,
            last_stop_reason: None,
        });

        Self {
            inner: Arc::new(MonitorInner {
                registry,
                scanner,
                store,
                alarms,
                config,
                slot: Mutex::new(Slot::Vacant),
                slot_settled: Notify::new(),
                phase,
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start monitoring. Returns the number of tracked beacons.
    ///
    /// Fails closed: on any error the monitor is back to idle and the error
    /// is returned. Nothing is retried automatically.
    ///
    /// # Errors
    ///
    /// - [`VeilleError::ScanAlreadyActive`] if a session is running, starting
    ///   or stopping
    /// - [`VeilleError::AccessDenied`] / [`VeilleError::RadioUnavailable`]
    ///   from the scanner
    /// - registry errors
    pub async fn start(&self) -> Result<usize> {
        {
            let mut slot = self.inner.slot.lock().await;
            if !matches!(*slot, Slot::Vacant) {
                return Err(VeilleError::ScanAlreadyActive);
            }
            *slot = Slot::Changing;
            self.set_phase(MonitorPhase::Starting, None);
        }

        // Detached, so a caller that gives up cannot leave the slot claimed.
        let monitor = self.clone();
        tokio::spawn(async move { monitor.finish_start().await })
            .await
            .map_err(|_| VeilleError::EngineStopped)?
    }

    /// Stop monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::MonitoringNotActive`] if no session is running,
    /// or one is still starting or already stopping.
    pub async fn stop(&self) -> Result<()> {
        let session = {
            let mut slot = self.inner.slot.lock().await;
            match std::mem::replace(&mut *slot, Slot::Changing) {
                Slot::Running(session) => session,
                other => {
                    *slot = other;
                    return Err(VeilleError::MonitoringNotActive);
                }
            }
        };

        let monitor = self.clone();
        tokio::spawn(async move { monitor.teardown(session, StopReason::Requested).await })
            .await
            .map_err(|_| VeilleError::EngineStopped)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> MonitorPhase {
        self.inner.phase.borrow().phase
    }

    /// Subscribe to lifecycle phase changes.
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<MonitorPhase> {
        let mut phases = self.inner.phase.subscribe();
        let (tx, rx) = watch::channel(phases.borrow().phase);
        tokio::spawn(async move {
            while phases.changed().await.is_ok() {
                let phase = phases.borrow_and_update().phase;
                if tx.send(phase).is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Phase, last stop reason and counts.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the state store is gone.
    pub async fn status(&self) -> Result<MonitorStatus> {
        let state = self.inner.phase.borrow().clone();
        let tracked_beacons = self.inner.store.snapshot().await?.len();
        let active_alarms = self.inner.alarms.active_alarms().await.len();
        Ok(MonitorStatus {
            phase: state.phase,
            active_since: state.active_since,
            last_stop_reason: state.last_stop_reason,
            tracked_beacons,
            active_alarms,
        })
    }

    /// Runtime state of every tracked beacon.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the state store is gone.
    pub async fn beacons(&self) -> Result<Vec<BeaconRuntimeState>> {
        self.inner.store.snapshot().await
    }

    /// Runtime state of one beacon.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the state store is gone.
    pub async fn beacon(&self, address: BeaconAddress) -> Result<Option<BeaconRuntimeState>> {
        self.inner.store.get(address).await
    }

    /// Open alarms, newest first.
    pub async fn alarms(&self) -> Vec<AlarmEvent> {
        self.inner.alarms.active_alarms().await
    }

    /// The alarm coordinator.
    #[must_use]
    pub fn alarm_coordinator(&self) -> &Arc<AlarmCoordinator> {
        &self.inner.alarms
    }

    /// The configuration store the engine reads.
    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.inner.config
    }

    /// The beacon registry the engine seeds from.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn BeaconRegistry> {
        &self.inner.registry
    }

    async fn finish_start(&self) -> Result<usize> {
        let opened = self.open_session().await;
        let mut slot = self.inner.slot.lock().await;
        let outcome = match opened {
            Ok((session, tracked)) => {
                *slot = Slot::Running(session);
                self.inner.phase.send_modify(|state| {
                    state.phase = MonitorPhase::Active;
                    state.active_since = Some(Utc::now());
                });
                info!(tracked, "Monitoring active");
                Ok(tracked)
            }
            Err(e) => {
                warn!(error = %e, "Monitoring failed to start");
                *slot = Slot::Vacant;
                self.set_phase(MonitorPhase::Idle, Some(StopReason::from_start_error(&e)));
                Err(e)
            }
        };
        drop(slot);
        self.inner.slot_settled.notify_waiters();
        outcome
    }

    async fn open_session(&self) -> Result<(Session, usize)> {
        let inner = &self.inner;
        let enrolled = inner.registry.list_enrolled().await?;
        if enrolled.is_empty() {
            warn!("No beacons enrolled, monitoring will not raise alarms");
        }
        let tracked = inner.store.track(enrolled.clone(), Utc::now()).await?;

        let (events_tx, events_rx) = mpsc::channel(SCAN_EVENT_QUEUE_DEPTH);
        if let Err(e) = inner.scanner.start(events_tx).await {
            if let Err(inert) = inner.store.set_active(false).await {
                warn!(error = %inert, "Could not make state store inert");
            }
            return Err(e);
        }

        let id = inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (failure_tx, failure_rx) = oneshot::channel();

        let ingestor = AdvertisementIngestor::new(
            &enrolled,
            inner.store.clone(),
            inner.alarms.clone(),
            inner.config.clone(),
        );
        let ingestion = tokio::spawn(ingestor.run(events_rx, shutdown_rx.clone(), failure_tx));

        let sweeper = TimeoutSweeper::new(
            inner.store.clone(),
            inner.alarms.clone(),
            inner.config.clone(),
        );
        let sweeper_task = tokio::spawn(sweeper.clone().run(shutdown_rx.clone()));
        let config_watch = tokio::spawn(watch_config(
            inner.config.clone(),
            sweeper,
            inner.alarms.clone(),
            shutdown_rx,
        ));

        spawn_failure_watcher(Arc::downgrade(&self.inner), id, failure_rx);
        debug!(session = id, "Monitoring session opened");

        Ok((
            Session {
                id,
                shutdown,
                sweeper: sweeper_task,
                ingestion,
                config_watch,
            },
            tracked,
        ))
    }

    async fn teardown(&self, mut session: Session, reason: StopReason) {
        let inner = &self.inner;
        debug!(session = session.id, ?reason, "Closing monitoring session");
        let _ = session.shutdown.send(true);

        join("sweeper", &mut session.sweeper).await;

        if let Err(e) = inner.scanner.stop().await {
            warn!(error = %e, "Radio scan did not stop cleanly");
        }

        if let Err(e) = inner.store.set_active(false).await {
            warn!(error = %e, "Could not make state store inert");
        }

        join("ingestion", &mut session.ingestion).await;
        join("config watch", &mut session.config_watch).await;

        inner.alarms.clear_all().await;
        {
            let mut slot = inner.slot.lock().await;
            *slot = Slot::Vacant;
            self.set_phase(MonitorPhase::Idle, Some(reason));
        }
        inner.slot_settled.notify_waiters();
        info!("Monitoring stopped");
    }

    fn set_phase(&self, phase: MonitorPhase, reason: Option<StopReason>) {
        self.inner.phase.send_modify(|state| {
            state.phase = phase;
            if phase != MonitorPhase::Active {
                state.active_since = None;
            }
            if reason.is_some() {
                state.last_stop_reason = reason;
            }
        });
    }
}

async fn join(name: &str, handle: &mut JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(task = name, error = %e, "Monitoring task panicked");
    }
}

/// Tear the session down when the scan fails. Waits out a start still in
/// progress; does nothing if the session already ended.
fn spawn_failure_watcher(inner: Weak<MonitorInner>, id: u64, failure: oneshot::Receiver<i32>) {
    tokio::spawn(async move {
        let Ok(code) = failure.await else {
            return;
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let monitor = Monitor { inner };

        loop {
            let settled = monitor.inner.slot_settled.notified();
            let session = {
                let mut slot = monitor.inner.slot.lock().await;
                match std::mem::replace(&mut *slot, Slot::Changing) {
                    Slot::Running(session) if session.id == id => Some(session),
                    Slot::Changing => None,
                    other => {
                        *slot = other;
                        return;
                    }
                }
            };
            if let Some(session) = session {
                error!(code, "Scan failed, monitoring stopped");
                monitor
                    .teardown(session, StopReason::ScanFailure { code })
                    .await;
                return;
            }
            settled.await;
        }
    });
}

/// Forward configuration changes for the lifetime of a session.
async fn watch_config(
    config: ConfigStore,
    sweeper: TimeoutSweeper,
    alarms: Arc<AlarmCoordinator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut updates = config.subscribe();
    let mut last = updates.borrow_and_update().clone();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = updates.borrow_and_update().clone();
                let change = ConfigChange::between(&last, &next);
                last = next.clone();
                if change.is_empty() {
                    continue;
                }

                if change.needs_sweep() {
                    debug!(?change, "Re-evaluating beacons after configuration change");
                    if let Err(e) = sweeper.tick(Utc::now()).await {
                        warn!(error = %e, "Re-evaluation failed");
                    }
                }
                alarms.on_config_change(change, &next).await;
            }
        }
    }
    debug!("Configuration watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::MonitorConfig;
    use crate::registry::InMemoryRegistry;
    use crate::scanner::{MockRadioScanner, MockStartFailure};
    use crate::sink::testing::{RecordingAlarmSink, SinkCall};
    use crate::store::{SignalUpdate, Thresholds};
    use crate::types::{Advertisement, AlarmKind, EnrolledBeacon};

    const TAG_A: &str = "AA:BB:CC:DD:EE:01";

    struct Harness {
        monitor: Monitor,
        scanner: Arc<MockRadioScanner>,
        sink: Arc<RecordingAlarmSink>,
    }

    fn harness(config: MonitorConfig) -> Harness {
        let registry = Arc::new(InMemoryRegistry::new(vec![
            EnrolledBeacon::new(TAG_A, "Tag-A").with_reference_signal(-59),
        ]));
        let scanner = Arc::new(MockRadioScanner::new());
        let sink = Arc::new(RecordingAlarmSink::default());
        let monitor = Monitor::new(
            registry,
            scanner.clone(),
            sink.clone(),
            StatusPublisher::disabled(),
            ConfigStore::new(config),
        );
        Harness {
            monitor,
            scanner,
            sink,
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_tag_a_end_to_end() {
        let h = harness(MonitorConfig {
            distance_threshold_meters: 8.0,
            ..MonitorConfig::default()
        });
        assert_eq!(h.monitor.start().await.unwrap(), 1);
        assert_eq!(h.monitor.phase(), MonitorPhase::Active);

        assert!(h.scanner.emit(Advertisement::new(TAG_A, -79)).await);
        let monitor = h.monitor.clone();
        eventually(|| {
            let monitor = monitor.clone();
            async move { !monitor.alarms().await.is_empty() }
        })
        .await;

        let alarms = h.monitor.alarms().await;
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].kind, AlarmKind::DistanceExceeded);
        assert_eq!(h.sink.calls(), vec![SinkCall::Play(80)]);

        let beacon = h
            .monitor
            .beacon(BeaconAddress::new(TAG_A))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(beacon.estimated_distance, Some(10.0));
        assert!(beacon.out_of_range);
    }

    fn beyond_threshold(at: DateTime<Utc>) -> SignalUpdate {
        SignalUpdate {
            address: BeaconAddress::new(TAG_A),
            smoothed_signal: -79,
            estimated_distance: Some(10.0),
            seen_at: at,
        }
    }

    #[tokio::test]
    async fn test_stop_tears_down_in_order() {
        let config = MonitorConfig {
            signal_loss_timeout_millis: 100,
            sweep_interval_millis: 20,
            distance_threshold_meters: 8.0,
            ..MonitorConfig::default()
        };
        let thresholds = Thresholds::from(&config);
        let h = harness(config);
        h.monitor.start().await.unwrap();
        h.scanner.set_stop_delay(Duration::from_millis(600));

        let stopping = {
            let monitor = h.monitor.clone();
            tokio::spawn(async move { monitor.stop().await })
        };
        let scanner = h.scanner.clone();
        eventually(|| {
            let scanner = scanner.clone();
            async move { scanner.stop_count() == 1 }
        })
        .await;

        // The scan is stopping. Tag-A has now been silent for longer than
        // the loss timeout, yet no sweep marks it lost.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let store = h.monitor.inner.store.clone();
        let beacon = store.get(BeaconAddress::new(TAG_A)).await.unwrap().unwrap();
        assert!(!beacon.signal_lost);
        assert!(h.scanner.is_scanning().await);

        // The store still reacts until the scan has stopped.
        let during = store
            .upsert_from_advertisement(beyond_threshold(Utc::now()), thresholds)
            .await
            .unwrap();
        assert_eq!(during.len(), 1);
        assert_eq!(h.monitor.phase(), MonitorPhase::Active);

        stopping.await.unwrap().unwrap();
        assert_eq!(h.monitor.phase(), MonitorPhase::Idle);
        assert_eq!(h.scanner.stop_count(), 1);
        assert!(!h.scanner.is_scanning().await);

        // Then it keeps its data but no longer reacts.
        let after = store
            .upsert_from_advertisement(beyond_threshold(Utc::now()), thresholds)
            .await
            .unwrap();
        assert!(after.is_empty());
        let swept = store
            .sweep_timeouts(Utc::now() + chrono::Duration::minutes(5), thresholds)
            .await
            .unwrap();
        assert!(swept.is_empty());

        let status = h.monitor.status().await.unwrap();
        assert_eq!(status.last_stop_reason, Some(StopReason::Requested));
        assert_eq!(status.tracked_beacons, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_calls_do_not_wait_on_radio() {
        let h = harness(MonitorConfig::default());
        h.monitor.start().await.unwrap();
        h.scanner.set_stop_delay(Duration::from_millis(500));

        let stopping = {
            let monitor = h.monitor.clone();
            tokio::spawn(async move { monitor.stop().await })
        };
        let scanner = h.scanner.clone();
        eventually(|| {
            let scanner = scanner.clone();
            async move { scanner.stop_count() == 1 }
        })
        .await;

        let start = tokio::time::timeout(Duration::from_millis(100), h.monitor.start())
            .await
            .unwrap();
        assert!(matches!(start, Err(VeilleError::ScanAlreadyActive)));
        let stop = tokio::time::timeout(Duration::from_millis(100), h.monitor.stop())
            .await
            .unwrap();
        assert!(matches!(stop, Err(VeilleError::MonitoringNotActive)));

        stopping.await.unwrap().unwrap();
        assert_eq!(h.monitor.phase(), MonitorPhase::Idle);
        h.scanner.set_stop_delay(Duration::ZERO);
        assert_eq!(h.monitor.start().await.unwrap(), 1);
        assert_eq!(h.scanner.start_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_leaves_no_open_alarm_kinds() {
        let h = harness(MonitorConfig {
            distance_threshold_meters: 8.0,
            ..MonitorConfig::default()
        });
        h.monitor.start().await.unwrap();
        h.scanner.emit(Advertisement::new(TAG_A, -79)).await;
        let monitor = h.monitor.clone();
        eventually(|| {
            let monitor = monitor.clone();
            async move { monitor.alarms().await.len() == 1 }
        })
        .await;

        h.monitor.stop().await.unwrap();
        let beacons = h.monitor.beacons().await.unwrap();
        assert!(h.monitor.alarms().await.is_empty());
        assert!(beacons[0].active_alarm_kinds.is_empty());
        assert!(!beacons[0].out_of_range);
        assert_eq!(beacons[0].estimated_distance, Some(10.0));
    }

    #[tokio::test]
    async fn test_stop_completes_when_scanner_refuses() {
        let h = harness(MonitorConfig::default());
        h.monitor.start().await.unwrap();
        h.scanner.set_fail_stop(true);

        h.monitor.stop().await.unwrap();
        assert_eq!(h.monitor.phase(), MonitorPhase::Idle);
        assert!(h.monitor.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_access_denied_fails_closed() {
        let h = harness(MonitorConfig::default());
        h.scanner
            .set_start_failure(Some(MockStartFailure::AccessDenied))
            .await;

        let err = h.monitor.start().await.unwrap_err();
        assert!(matches!(err, VeilleError::AccessDenied(_)));
        assert_eq!(h.monitor.phase(), MonitorPhase::Idle);
        assert_eq!(h.scanner.start_count(), 0);

        let status = h.monitor.status().await.unwrap();
        assert_eq!(status.last_stop_reason, Some(StopReason::AccessDenied));

        h.scanner.set_start_failure(None).await;
        h.monitor.start().await.unwrap();
        assert_eq!(h.monitor.phase(), MonitorPhase::Active);
    }

    #[tokio::test]
    async fn test_radio_unavailable_fails_closed() {
        let h = harness(MonitorConfig::default());
        h.scanner
            .set_start_failure(Some(MockStartFailure::RadioUnavailable))
            .await;

        assert!(matches!(
            h.monitor.start().await,
            Err(VeilleError::RadioUnavailable(_))
        ));
        assert_eq!(h.monitor.phase(), MonitorPhase::Idle);
    }

    #[tokio::test]
    async fn test_scan_failure_returns_to_idle() {
        let h = harness(MonitorConfig::default());
        h.monitor.start().await.unwrap();

        assert!(h.scanner.fail(133).await);
        let mut phases = h.monitor.subscribe_phase();
        tokio::time::timeout(
            Duration::from_secs(1),
            phases.wait_for(|phase| *phase == MonitorPhase::Idle),
        )
        .await
        .unwrap()
        .unwrap();

        let status = h.monitor.status().await.unwrap();
        assert_eq!(
            status.last_stop_reason,
            Some(StopReason::ScanFailure { code: 133 })
        );
        assert_eq!(h.scanner.stop_count(), 1);
        assert_eq!(h.scanner.start_count(), 1);
    }

    #[tokio::test]
    async fn test_double_start_and_idle_stop_are_rejected() {
        let h = harness(MonitorConfig::default());
        assert!(matches!(
            h.monitor.stop().await,
            Err(VeilleError::MonitoringNotActive)
        ));

        h.monitor.start().await.unwrap();
        assert!(matches!(
            h.monitor.start().await,
            Err(VeilleError::ScanAlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_threshold_change_triggers_reevaluation() {
        let h = harness(MonitorConfig::default());
        h.monitor.start().await.unwrap();

        h.scanner.emit(Advertisement::new(TAG_A, -79)).await;
        let monitor = h.monitor.clone();
        eventually(|| {
            let monitor = monitor.clone();
            async move {
                monitor
                    .beacon(BeaconAddress::new(TAG_A))
                    .await
                    .unwrap()
                    .is_some_and(|b| b.last_seen_at.is_some())
            }
        })
        .await;
        assert!(h.monitor.alarms().await.is_empty());

        h.monitor
            .config()
            .update(|c| c.distance_threshold_meters = 8.0)
            .unwrap();
        let monitor = h.monitor.clone();
        eventually(|| {
            let monitor = monitor.clone();
            async move { monitor.alarms().await.len() == 1 }
        })
        .await;
        assert_eq!(h.monitor.alarms().await[0].kind, AlarmKind::DistanceExceeded);
    }

    #[tokio::test]
    async fn test_silence_toggle_while_active() {
        let h = harness(MonitorConfig {
            distance_threshold_meters: 8.0,
            is_silenced: true,
            ..MonitorConfig::default()
        });
        h.monitor.start().await.unwrap();
        h.scanner.emit(Advertisement::new(TAG_A, -79)).await;

        let monitor = h.monitor.clone();
        eventually(|| {
            let monitor = monitor.clone();
            async move { monitor.alarms().await.len() == 1 }
        })
        .await;
        assert_eq!(h.sink.play_count(), 0);

        h.monitor.config().update(|c| c.is_silenced = false).unwrap();
        let sink = h.sink.clone();
        eventually(|| {
            let sink = sink.clone();
            async move { sink.play_count() == 1 }
        })
        .await;
        assert!(h.sink.is_playing());
    }

    #[tokio::test]
    async fn test_stop_clears_alarms_and_sound() {
        let h = harness(MonitorConfig {
            distance_threshold_meters: 8.0,
            ..MonitorConfig::default()
        });
        h.monitor.start().await.unwrap();
        h.scanner.emit(Advertisement::new(TAG_A, -79)).await;
        let sink = h.sink.clone();
        eventually(|| {
            let sink = sink.clone();
            async move { sink.is_playing() }
        })
        .await;

        h.monitor.stop().await.unwrap();
        assert!(h.monitor.alarms().await.is_empty());
        assert!(!h.sink.is_playing());
    }
}
