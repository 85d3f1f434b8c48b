//! Outward collaborators: the alarm sound sink and the status sink.
//!
//! Both are fire-and-forget from the engine's point of view. [`AlarmSink`]
//! calls must not block and must be idempotent. Status updates (beacon
//! snapshots, alarm lists) are queued to a dispatcher task by
//! [`StatusPublisher`] so a slow or failing sink never stalls ingestion.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{AlarmEvent, BeaconRuntimeState};

/// Plays the audible alarm.
///
/// `play` while already playing only adjusts the volume; `stop` while idle is
/// a no-op. Implementations hand the actual playback to their own execution
/// context and return immediately.
pub trait AlarmSink: Send + Sync {
    /// Start (or keep) playing at `volume_percent`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VeilleError::SinkFailure`] if the device refuses.
    fn play(&self, volume_percent: u8) -> Result<()>;

    /// Stop playing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VeilleError::SinkFailure`] if the device refuses.
    fn stop(&self) -> Result<()>;

    /// Whether sound is currently playing.
    fn is_playing(&self) -> bool;
}

/// Alarm sink that only records its state and logs.
///
/// Used on headless deployments where the alarm is surfaced through the API
/// and the journal.
#[derive(Debug, Default)]
pub struct LogAlarmSink {
    playing: AtomicBool,
    volume: AtomicU8,
}

impl LogAlarmSink {
    /// Create an idle sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last requested volume.
    #[must_use]
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }
}

impl AlarmSink for LogAlarmSink {
    fn play(&self, volume_percent: u8) -> Result<()> {
        self.volume.store(volume_percent, Ordering::SeqCst);
        if self.playing.swap(true, Ordering::SeqCst) {
            debug!(volume_percent, "Alarm volume adjusted");
        } else {
            warn!(volume_percent, "Alarm sounding");
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if self.playing.swap(false, Ordering::SeqCst) {
            info!("Alarm sound stopped");
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Receives state pushed outward for display or persistence.
///
/// The engine never reads anything back from it.
pub trait StatusSink: Send + Sync {
    /// Latest runtime state of every tracked beacon.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the update; it is logged
    /// and dropped.
    fn on_snapshot(&self, snapshot: &[BeaconRuntimeState]) -> Result<()>;

    /// Current list of open alarms, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot accept the update; it is logged
    /// and dropped.
    fn on_alarms(&self, alarms: &[AlarmEvent]) -> Result<()>;
}

/// Status sink that keeps the latest values in `watch` channels.
#[derive(Debug)]
pub struct WatchStatusSink {
    beacons: watch::Sender<Vec<BeaconRuntimeState>>,
    alarms: watch::Sender<Vec<AlarmEvent>>,
}

impl WatchStatusSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        let (beacons, _) = watch::channel(Vec::new());
        let (alarms, _) = watch::channel(Vec::new());
        Self { beacons, alarms }
    }

    /// Latest beacon snapshot.
    #[must_use]
    pub fn beacons(&self) -> Vec<BeaconRuntimeState> {
        self.beacons.borrow().clone()
    }

    /// Latest alarm list.
    #[must_use]
    pub fn alarms(&self) -> Vec<AlarmEvent> {
        self.alarms.borrow().clone()
    }

    /// Subscribe to beacon snapshots.
    #[must_use]
    pub fn subscribe_beacons(&self) -> watch::Receiver<Vec<BeaconRuntimeState>> {
        self.beacons.subscribe()
    }

    /// Subscribe to alarm lists.
    #[must_use]
    pub fn subscribe_alarms(&self) -> watch::Receiver<Vec<AlarmEvent>> {
        self.alarms.subscribe()
    }
}

impl Default for WatchStatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for WatchStatusSink {
    fn on_snapshot(&self, snapshot: &[BeaconRuntimeState]) -> Result<()> {
        self.beacons.send_replace(snapshot.to_vec());
        Ok(())
    }

    fn on_alarms(&self, alarms: &[AlarmEvent]) -> Result<()> {
        self.alarms.send_replace(alarms.to_vec());
        Ok(())
    }
}

#[derive(Debug)]
enum StatusUpdate {
    Snapshot(Vec<BeaconRuntimeState>),
    Alarms(Vec<AlarmEvent>),
}

/// Non-blocking handle used by the engine to push status updates.
#[derive(Debug, Clone, Default)]
pub struct StatusPublisher {
    tx: Option<mpsc::UnboundedSender<StatusUpdate>>,
}

impl StatusPublisher {
    /// Spawn a dispatcher task forwarding updates to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(sink: Arc<dyn StatusSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let result = match &update {
                    StatusUpdate::Snapshot(snapshot) => sink.on_snapshot(snapshot),
                    StatusUpdate::Alarms(alarms) => sink.on_alarms(alarms),
                };
                if let Err(e) = result {
                    warn!(error = %e, "Status sink rejected update");
                }
            }
            debug!("Status dispatcher stopped");
        });
        Self { tx: Some(tx) }
    }

    /// A publisher that drops every update.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a beacon snapshot.
    pub fn publish_snapshot(&self, snapshot: Vec<BeaconRuntimeState>) {
        self.send(StatusUpdate::Snapshot(snapshot));
    }

    /// Queue an alarm list.
    pub fn publish_alarms(&self, alarms: Vec<AlarmEvent>) {
        self.send(StatusUpdate::Alarms(alarms));
    }

    fn send(&self, update: StatusUpdate) {
        if let Some(tx) = &self.tx {
            if tx.send(update).is_err() {
                debug!("Status dispatcher gone, update dropped");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Alarm sink that records every call.
    #[derive(Debug, Default)]
    pub struct RecordingAlarmSink {
        calls: Mutex<Vec<SinkCall>>,
        playing: AtomicBool,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SinkCall {
        Play(u8),
        Stop,
    }

    impl RecordingAlarmSink {
        pub fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn play_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, SinkCall::Play(_)))
                .count()
        }
    }

    impl AlarmSink for RecordingAlarmSink {
        fn play(&self, volume_percent: u8) -> Result<()> {
            self.calls.lock().unwrap().push(SinkCall::Play(volume_percent));
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.calls.lock().unwrap().push(SinkCall::Stop);
            self.playing.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnrolledBeacon;
    use chrono::Utc;

    #[test]
    fn test_log_sink_is_idempotent() {
        let sink = LogAlarmSink::new();
        assert!(!sink.is_playing());

        sink.stop().unwrap();
        assert!(!sink.is_playing());

        sink.play(80).unwrap();
        sink.play(40).unwrap();
        assert!(sink.is_playing());
        assert_eq!(sink.volume(), 40);

        sink.stop().unwrap();
        assert!(!sink.is_playing());
    }

    #[tokio::test]
    async fn test_publisher_forwards_to_watch_sink() {
        let sink = Arc::new(WatchStatusSink::new());
        let mut beacons = sink.subscribe_beacons();
        let publisher = StatusPublisher::spawn(sink.clone());

        let beacon = EnrolledBeacon::new("AA:BB:CC:DD:EE:01", "Tag-A");
        publisher.publish_snapshot(vec![BeaconRuntimeState::new(&beacon, Utc::now())]);

        beacons.changed().await.unwrap();
        assert_eq!(sink.beacons().len(), 1);
        assert_eq!(sink.beacons()[0].name, "Tag-A");
    }

    #[test]
    fn test_disabled_publisher_drops_updates() {
        let publisher = StatusPublisher::disabled();
        publisher.publish_alarms(Vec::new());
    }
}
