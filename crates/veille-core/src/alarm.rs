//! Alarm coordination.
//!
//! The [`AlarmCoordinator`] owns the list of open [`AlarmEvent`]s and decides
//! when the [`AlarmSink`] plays. There is at most one open alarm per
//! `(beacon, kind)`; a repeated entry is ignored. Sound plays while any alarm
//! is open and the configuration is not silenced.
//!
//! Store transitions may reach [`AlarmCoordinator::apply`] from several tasks
//! out of store order. Each `(beacon, kind)` axis remembers the sequence
//! number of the last transition applied to it, and older transitions are
//! dropped, so the alarm list follows the store's order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigChange, ConfigStore, MonitorConfig};
use crate::error::Result;
use crate::sink::{AlarmSink, StatusPublisher};
use crate::types::{AlarmEvent, AlarmKind, BeaconAddress, Transition, TransitionEdge};

/// How long a test alarm plays.
pub const DEFAULT_TEST_SOUND_DURATION: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct AlarmBook {
    /// Newest first.
    open: Vec<AlarmEvent>,
    applied: HashMap<(BeaconAddress, AlarmKind), u64>,
}

impl AlarmBook {
    fn is_open(&self, address: &BeaconAddress, kind: AlarmKind) -> bool {
        self.open
            .iter()
            .any(|alarm| &alarm.address == address && alarm.kind == kind)
    }

    /// Record `transition` as applied; `false` if a later one already was.
    fn advance(&mut self, transition: &Transition) -> bool {
        let key = (transition.address.clone(), transition.kind);
        match self.applied.get(&key) {
            Some(&last) if last >= transition.seq => false,
            _ => {
                self.applied.insert(key, transition.seq);
                true
            }
        }
    }
}

/// Owns open alarms and drives the alarm sink.
pub struct AlarmCoordinator {
    book: Mutex<AlarmBook>,
    sink: Arc<dyn AlarmSink>,
    config: ConfigStore,
    publisher: StatusPublisher,
    test_generation: AtomicU64,
}

impl std::fmt::Debug for AlarmCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmCoordinator")
            .field("playing", &self.sink.is_playing())
            .finish_non_exhaustive()
    }
}

impl AlarmCoordinator {
    /// Create a coordinator with no open alarms.
    pub fn new(sink: Arc<dyn AlarmSink>, config: ConfigStore, publisher: StatusPublisher) -> Self {
        Self {
            book: Mutex::new(AlarmBook::default()),
            sink,
            config,
            publisher,
            test_generation: AtomicU64::new(0),
        }
    }

    /// Open an alarm for `(address, kind)`.
    ///
    /// Returns `false` if one is already open.
    pub async fn on_enter(
        &self,
        address: &BeaconAddress,
        beacon_name: &str,
        kind: AlarmKind,
        message: String,
    ) -> bool {
        let mut book = self.book.lock().await;
        let opened = self.open(&mut book, address, beacon_name, kind, message);
        if opened {
            self.publisher.publish_alarms(book.open.clone());
        }
        opened
    }

    /// Close the alarm for `(address, kind)`; stops the sound when it was
    /// the last one.
    ///
    /// Returns `false` if no such alarm was open.
    pub async fn on_exit(&self, address: &BeaconAddress, kind: AlarmKind) -> bool {
        let mut book = self.book.lock().await;
        let closed = self.close(&mut book, address, kind);
        if closed {
            self.publisher.publish_alarms(book.open.clone());
        }
        closed
    }

    /// Apply store transitions in order, dropping any that is older than
    /// one already applied to the same `(beacon, kind)`.
    pub async fn apply(&self, transitions: &[Transition]) {
        let mut book = self.book.lock().await;
        let mut changed = false;
        for transition in transitions {
            if !book.advance(transition) {
                debug!(
                    address = %transition.address,
                    kind = %transition.kind,
                    seq = transition.seq,
                    "Superseded transition dropped"
                );
                continue;
            }
            changed |= match transition.edge {
                TransitionEdge::Entered => self.open(
                    &mut book,
                    &transition.address,
                    &transition.name,
                    transition.kind,
                    transition.message.clone(),
                ),
                TransitionEdge::Exited => {
                    self.close(&mut book, &transition.address, transition.kind)
                }
            };
        }
        if changed {
            self.publisher.publish_alarms(book.open.clone());
        }
    }

    /// React to a configuration update.
    pub async fn on_config_change(&self, change: ConfigChange, config: &MonitorConfig) {
        let book = self.book.lock().await;
        if change.silence {
            if config.is_silenced {
                info!(open = book.open.len(), "Alarms silenced");
                self.stop();
            } else if !book.open.is_empty() {
                info!(open = book.open.len(), "Alarms unsilenced");
                self.play(config.alarm_volume_percent);
            }
        } else if change.volume && self.sink.is_playing() {
            debug!(volume = config.alarm_volume_percent, "Adjusting alarm volume");
            self.play(config.alarm_volume_percent);
        }
    }

    /// Play the alarm for `duration` regardless of the silence flag.
    ///
    /// When the duration elapses the sound stops unless unsilenced alarms
    /// are open by then.
    ///
    /// # Errors
    ///
    /// Returns the sink error if playback cannot start.
    pub fn test_sound(self: &Arc<Self>, duration: Duration) -> Result<()> {
        let volume = self.config.get().alarm_volume_percent;
        self.sink.play(volume)?;
        info!(volume, duration_ms = duration.as_millis(), "Playing test alarm");

        let generation = self.test_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if coordinator.test_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let book = coordinator.book.lock().await;
            if book.open.is_empty() || coordinator.config.get().is_silenced {
                coordinator.stop();
            }
        });
        Ok(())
    }

    /// Drop every open alarm and stop the sound.
    pub async fn clear_all(&self) {
        let mut book = self.book.lock().await;
        if !book.open.is_empty() {
            info!(count = book.open.len(), "Clearing all alarms");
            book.open.clear();
            self.publisher.publish_alarms(Vec::new());
        }
        self.stop();
    }

    /// Open alarms, newest first.
    pub async fn active_alarms(&self) -> Vec<AlarmEvent> {
        self.book.lock().await.open.clone()
    }

    /// Whether the sink is currently playing.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.sink.is_playing()
    }

    /// The silence flag is read while `book` is locked, so a concurrent
    /// silence cannot be undone by a stale snapshot.
    fn open(
        &self,
        book: &mut AlarmBook,
        address: &BeaconAddress,
        beacon_name: &str,
        kind: AlarmKind,
        message: String,
    ) -> bool {
        if book.is_open(address, kind) {
            debug!(%address, %kind, "Alarm already open");
            return false;
        }

        warn!(%address, %kind, %message, "Alarm raised");
        book.open.insert(
            0,
            AlarmEvent {
                id: Uuid::new_v4(),
                address: address.clone(),
                beacon_name: beacon_name.to_string(),
                kind,
                message,
                raised_at: Utc::now(),
            },
        );
        let config = self.config.get();
        if !config.is_silenced {
            self.play(config.alarm_volume_percent);
        }
        true
    }

    fn close(&self, book: &mut AlarmBook, address: &BeaconAddress, kind: AlarmKind) -> bool {
        let before = book.open.len();
        book.open
            .retain(|alarm| !(&alarm.address == address && alarm.kind == kind));
        if book.open.len() == before {
            return false;
        }

        info!(%address, %kind, "Alarm cleared");
        if book.open.is_empty() {
            self.stop();
        }
        true
    }

    fn play(&self, volume: u8) {
        if let Err(e) = self.sink.play(volume) {
            warn!(error = %e, "Alarm sink failed to play");
        }
    }

    fn stop(&self) {
        if let Err(e) = self.sink.stop() {
            warn!(error = %e, "Alarm sink failed to stop");
        }
    }
}
