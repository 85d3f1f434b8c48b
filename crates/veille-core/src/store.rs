//! The beacon state store.
//!
//! One task owns the map of [`BeaconRuntimeState`] and applies commands
//! strictly one at a time. Advertisement ingestion and the timeout sweep both
//! go through [`BeaconStateStore`], so a visibility transition and a range
//! transition for the same beacon are always computed from the same,
//! complete state. Readers get copies taken between two commands.
//!
//! # State machine
//!
//! ```text
//!  visibility:  Visible ── silence > timeout (sweep) ──► SignalLost
//!                  ▲                                        │
//!                  └──────────── advertisement ─────────────┘
//!
//!  range (only while Visible with a known distance):
//!               InRange ── distance > threshold ──► OutOfRange
//!                  ▲                                    │
//!                  └── distance <= threshold, signal ───┘
//!                      lost, or distance unknown
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::config::MonitorConfig;
use crate::error::{Result, VeilleError};
use crate::sink::StatusPublisher;
use crate::types::{
    AlarmKind, BeaconAddress, BeaconRuntimeState, EnrolledBeacon, Transition,
};

/// Capacity of the command queue.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Limits a state evaluation runs against, snapshotted from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Silence after which the signal is lost, in milliseconds.
    pub signal_loss_timeout_millis: u64,
    /// Distance above which a beacon is out of range, in meters.
    pub distance_threshold_meters: f64,
}

impl From<&MonitorConfig> for Thresholds {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            signal_loss_timeout_millis: config.signal_loss_timeout_millis,
            distance_threshold_meters: config.distance_threshold_meters,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// A processed advertisement ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalUpdate {
    /// Beacon address.
    pub address: BeaconAddress,
    /// Smoothed signal strength.
    pub smoothed_signal: i16,
    /// Estimated distance, if the signal was usable.
    pub estimated_distance: Option<f64>,
    /// When the advertisement was received.
    pub seen_at: DateTime<Utc>,
}

/// The state owned by the store task.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    beacons: BTreeMap<BeaconAddress, BeaconRuntimeState>,
    active: bool,
    next_seq: u64,
}

impl StoreState {
    /// Replace the tracked set with fresh states and become active.
    pub(crate) fn track(&mut self, enrolled: &[EnrolledBeacon], now: DateTime<Utc>) -> usize {
        self.beacons = enrolled
            .iter()
            .map(|beacon| {
                (
                    beacon.address.clone(),
                    BeaconRuntimeState::new(beacon, now),
                )
            })
            .collect();
        self.active = true;
        self.beacons.len()
    }

    /// Going inert also closes every alarm axis, since no alarm stays open
    /// outside a monitoring session.
    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
        if !active {
            for state in self.beacons.values_mut() {
                state.signal_lost = false;
                state.out_of_range = false;
                state.active_alarm_kinds.clear();
            }
        }
    }

    pub(crate) fn upsert(&mut self, update: &SignalUpdate, thresholds: Thresholds) -> Vec<Transition> {
        if !self.active {
            trace!(address = %update.address, "Store inert, advertisement ignored");
            return Vec::new();
        }
        let Some(state) = self.beacons.get_mut(&update.address) else {
            debug!(address = %update.address, "Advertisement for untracked beacon ignored");
            return Vec::new();
        };

        let mut transitions = Vec::new();
        state.smoothed_signal = Some(update.smoothed_signal);
        state.estimated_distance = update.estimated_distance;
        state.last_seen_at = Some(update.seen_at);

        if state.signal_lost {
            state.signal_lost = false;
            state.active_alarm_kinds.remove(&AlarmKind::SignalLost);
            info!(beacon = %state.name, address = %state.address, "Signal recovered");
            transitions.push(Transition::exited(state, AlarmKind::SignalLost));
        }
        evaluate_range(state, thresholds.distance_threshold_meters, &mut transitions);
        self.sequence(transitions)
    }

    pub(crate) fn sweep(&mut self, now: DateTime<Utc>, thresholds: Thresholds) -> Vec<Transition> {
        if !self.active {
            return Vec::new();
        }
        let timeout = i64::try_from(thresholds.signal_loss_timeout_millis).unwrap_or(i64::MAX);

        let mut transitions = Vec::new();
        for state in self.beacons.values_mut() {
            let silent_for = (now - state.staleness_reference()).num_milliseconds();
            if !state.signal_lost && silent_for > timeout {
                state.signal_lost = true;
                state.active_alarm_kinds.insert(AlarmKind::SignalLost);
                info!(
                    beacon = %state.name,
                    address = %state.address,
                    silent_for_ms = silent_for,
                    "Signal lost"
                );
                transitions.push(Transition::entered(state, AlarmKind::SignalLost));
            }
            evaluate_range(state, thresholds.distance_threshold_meters, &mut transitions);
        }
        self.sequence(transitions)
    }

    /// Stamp transitions with the store's running sequence number.
    fn sequence(&mut self, mut transitions: Vec<Transition>) -> Vec<Transition> {
        for transition in &mut transitions {
            self.next_seq += 1;
            transition.seq = self.next_seq;
        }
        transitions
    }

    pub(crate) fn snapshot(&self) -> Vec<BeaconRuntimeState> {
        self.beacons.values().cloned().collect()
    }

    pub(crate) fn get(&self, address: &BeaconAddress) -> Option<BeaconRuntimeState> {
        self.beacons.get(address).cloned()
    }
}

/// Re-evaluate the range axis of one beacon.
///
/// Out of range requires a live signal and a known distance; anything else
/// clears it.
fn evaluate_range(state: &mut BeaconRuntimeState, threshold: f64, transitions: &mut Vec<Transition>) {
    let beyond = !state.signal_lost && state.estimated_distance.is_some_and(|d| d > threshold);

    if beyond && !state.out_of_range {
        state.out_of_range = true;
        state.active_alarm_kinds.insert(AlarmKind::DistanceExceeded);
        info!(
            beacon = %state.name,
            distance = ?state.estimated_distance,
            threshold,
            "Beacon out of range"
        );
        transitions.push(Transition::entered(state, AlarmKind::DistanceExceeded));
    } else if !beyond && state.out_of_range {
        state.out_of_range = false;
        state.active_alarm_kinds.remove(&AlarmKind::DistanceExceeded);
        info!(
            beacon = %state.name,
            distance = ?state.estimated_distance,
            signal_lost = state.signal_lost,
            "Beacon back in range"
        );
        transitions.push(Transition::exited(state, AlarmKind::DistanceExceeded));
    }
}

enum Command {
    Track {
        beacons: Vec<EnrolledBeacon>,
        now: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    SetActive {
        active: bool,
        reply: oneshot::Sender<()>,
    },
    Upsert {
        update: SignalUpdate,
        thresholds: Thresholds,
        reply: oneshot::Sender<Vec<Transition>>,
    },
    Sweep {
        now: DateTime<Utc>,
        thresholds: Thresholds,
        reply: oneshot::Sender<Vec<Transition>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<BeaconRuntimeState>>,
    },
    Get {
        address: BeaconAddress,
        reply: oneshot::Sender<Option<BeaconRuntimeState>>,
    },
}

/// Handle to the store task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BeaconStateStore {
    tx: mpsc::Sender<Command>,
}

impl BeaconStateStore {
    /// Spawn the store task. Snapshots are pushed to `publisher` after every
    /// change.
    ///
    /// Must be called from within a tokio runtime. The task ends when the last
    /// handle is dropped.
    #[must_use]
    pub fn spawn(publisher: StatusPublisher) -> Self {
        let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        tokio::spawn(async move {
            let mut state = StoreState::default();
            while let Some(command) = rx.recv().await {
                let changed = apply(&mut state, command);
                if changed {
                    publisher.publish_snapshot(state.snapshot());
                }
            }
            debug!("Beacon state store stopped");
        });
        Self { tx }
    }

    /// Seed the tracked beacons (fresh state for each) and make the store
    /// active. Returns the number of tracked beacons.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the store task is gone.
    pub async fn track(&self, beacons: Vec<EnrolledBeacon>, now: DateTime<Utc>) -> Result<usize> {
        self.request(|reply| Command::Track { beacons, now, reply })
            .await
    }

    /// Enable or disable transitions. An inert store keeps its signal data
    /// but closes every alarm axis and ignores updates and sweeps.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the store task is gone.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.request(|reply| Command::SetActive { active, reply })
            .await
    }

    /// Apply a processed advertisement and return the resulting transitions.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the store task is gone.
    pub async fn upsert_from_advertisement(
        &self,
        update: SignalUpdate,
        thresholds: Thresholds,
    ) -> Result<Vec<Transition>> {
        self.request(|reply| Command::Upsert {
            update,
            thresholds,
            reply,
        })
        .await
    }

    /// Re-evaluate staleness and range of every tracked beacon.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the store task is gone.
    pub async fn sweep_timeouts(
        &self,
        now: DateTime<Utc>,
        thresholds: Thresholds,
    ) -> Result<Vec<Transition>> {
        self.request(|reply| Command::Sweep {
            now,
            thresholds,
            reply,
        })
        .await
    }

    /// Copy of every tracked beacon's state, ordered by address.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the store task is gone.
    pub async fn snapshot(&self) -> Result<Vec<BeaconRuntimeState>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Copy of one beacon's state.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the store task is gone.
    pub async fn get(&self, address: BeaconAddress) -> Result<Option<BeaconRuntimeState>> {
        self.request(|reply| Command::Get { address, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| VeilleError::EngineStopped)?;
        response.await.map_err(|_| VeilleError::EngineStopped)
    }
}

/// Apply one command; returns whether the beacon state changed.
fn apply(state: &mut StoreState, command: Command) -> bool {
    match command {
        Command::Track { beacons, now, reply } => {
            let count = state.track(&beacons, now);
            info!(count, "Tracking enrolled beacons");
            let _ = reply.send(count);
            true
        }
        Command::SetActive { active, reply } => {
            state.set_active(active);
            debug!(active, "Beacon state store activity changed");
            let _ = reply.send(());
            !active
        }
        Command::Upsert {
            update,
            thresholds,
            reply,
        } => {
            let changed = state.active && state.beacons.contains_key(&update.address);
            let _ = reply.send(state.upsert(&update, thresholds));
            changed
        }
        Command::Sweep {
            now,
            thresholds,
            reply,
        } => {
            let transitions = state.sweep(now, thresholds);
            let changed = !transitions.is_empty();
            let _ = reply.send(transitions);
            changed
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(state.snapshot());
            false
        }
        Command::Get { address, reply } => {
            let _ = reply.send(state.get(&address));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::types::TransitionEdge;

    const TAG_A: &str = "AA:BB:CC:DD:EE:01";

    fn thresholds(threshold: f64) -> Thresholds {
        Thresholds {
            signal_loss_timeout_millis: 20_000,
            distance_threshold_meters: threshold,
        }
    }

    fn seeded(t0: DateTime<Utc>) -> StoreState {
        let mut state = StoreState::default();
        state.track(&[EnrolledBeacon::new(TAG_A, "Tag-A")], t0);
        state
    }

    fn seen(at: DateTime<Utc>, distance: Option<f64>) -> SignalUpdate {
        SignalUpdate {
            address: BeaconAddress::new(TAG_A),
            smoothed_signal: -70,
            estimated_distance: distance,
            seen_at: at,
        }
    }

    fn tag(state: &StoreState) -> BeaconRuntimeState {
        state.get(&BeaconAddress::new(TAG_A)).unwrap()
    }

    #[test]
    fn test_signal_loss_timing() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(2.0)), thresholds(30.0));

        let early = state.sweep(t0 + Duration::milliseconds(19_999), thresholds(30.0));
        assert!(early.is_empty());
        assert!(!tag(&state).signal_lost);

        let late = state.sweep(t0 + Duration::milliseconds(20_001), thresholds(30.0));
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].kind, AlarmKind::SignalLost);
        assert_eq!(late[0].edge, TransitionEdge::Entered);
        assert_eq!(late[0].message, "Tag-A - Signal lost!");
        assert!(tag(&state).signal_lost);
        assert!(tag(&state).active_alarm_kinds.contains(&AlarmKind::SignalLost));
    }

    #[test]
    fn test_repeated_sweeps_report_loss_once() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(2.0)), thresholds(30.0));

        let first = state.sweep(t0 + Duration::seconds(21), thresholds(30.0));
        let second = state.sweep(t0 + Duration::seconds(26), thresholds(30.0));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_advertisement_recovers_signal_once() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(2.0)), thresholds(30.0));
        state.sweep(t0 + Duration::seconds(21), thresholds(30.0));

        let t1 = t0 + Duration::seconds(22);
        let recovered = state.upsert(&seen(t1, Some(2.0)), thresholds(30.0));
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].kind, AlarmKind::SignalLost);
        assert_eq!(recovered[0].edge, TransitionEdge::Exited);

        let again = state.upsert(&seen(t1, Some(2.0)), thresholds(30.0));
        assert!(again.is_empty());
        assert!(!tag(&state).signal_lost);
        assert_eq!(tag(&state).last_seen_at, Some(t1));
    }

    #[test]
    fn test_range_threshold_is_exclusive() {
        let t0 = Utc::now();
        let mut state = seeded(t0);

        let at_threshold = state.upsert(&seen(t0, Some(30.00)), thresholds(30.0));
        assert!(at_threshold.is_empty());
        assert!(!tag(&state).out_of_range);

        let beyond = state.upsert(&seen(t0, Some(30.01)), thresholds(30.0));
        assert_eq!(beyond.len(), 1);
        assert_eq!(beyond[0].kind, AlarmKind::DistanceExceeded);
        assert_eq!(beyond[0].edge, TransitionEdge::Entered);
        assert_eq!(beyond[0].message, "Tag-A at 30m - Out of range!");
        assert!(tag(&state).out_of_range);

        let back = state.upsert(&seen(t0, Some(30.00)), thresholds(30.0));
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].edge, TransitionEdge::Exited);
    }

    #[test]
    fn test_signal_loss_clears_out_of_range() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(50.0)), thresholds(30.0));
        assert!(tag(&state).out_of_range);

        let transitions = state.sweep(t0 + Duration::seconds(21), thresholds(30.0));
        let kinds: Vec<_> = transitions.iter().map(|t| (t.kind, t.edge)).collect();
        assert_eq!(
            kinds,
            vec![
                (AlarmKind::SignalLost, TransitionEdge::Entered),
                (AlarmKind::DistanceExceeded, TransitionEdge::Exited),
            ]
        );
        let beacon = tag(&state);
        assert!(beacon.signal_lost);
        assert!(!beacon.out_of_range);
    }

    #[test]
    fn test_unknown_distance_clears_out_of_range() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(50.0)), thresholds(30.0));

        let transitions = state.upsert(&seen(t0, None), thresholds(30.0));
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, AlarmKind::DistanceExceeded);
        assert_eq!(transitions[0].edge, TransitionEdge::Exited);
        assert!(!tag(&state).out_of_range);
    }

    #[test]
    fn test_sweep_applies_new_threshold() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(12.0)), thresholds(30.0));

        let transitions = state.sweep(t0 + Duration::seconds(1), thresholds(10.0));
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, AlarmKind::DistanceExceeded);
        assert_eq!(transitions[0].edge, TransitionEdge::Entered);
    }

    #[test]
    fn test_never_seen_beacon_is_lost_after_timeout() {
        let t0 = Utc::now();
        let mut state = seeded(t0);

        assert!(state.sweep(t0 + Duration::seconds(19), thresholds(30.0)).is_empty());
        let transitions = state.sweep(t0 + Duration::seconds(21), thresholds(30.0));
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, AlarmKind::SignalLost);
    }

    #[test]
    fn test_inert_store_ignores_updates() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.set_active(false);

        assert!(state.upsert(&seen(t0, Some(50.0)), thresholds(30.0)).is_empty());
        assert!(state.sweep(t0 + Duration::minutes(5), thresholds(30.0)).is_empty());
        assert_eq!(tag(&state).last_seen_at, None);
    }

    #[test]
    fn test_going_inert_closes_alarm_axes() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        state.upsert(&seen(t0, Some(50.0)), thresholds(30.0));
        state.sweep(t0 + Duration::seconds(21), thresholds(30.0));
        assert!(tag(&state).signal_lost);

        state.set_active(false);
        let beacon = tag(&state);
        assert!(!beacon.signal_lost);
        assert!(!beacon.out_of_range);
        assert!(beacon.active_alarm_kinds.is_empty());
        assert_eq!(beacon.last_seen_at, Some(t0));
        assert_eq!(beacon.smoothed_signal, Some(-70));
    }

    #[test]
    fn test_transitions_carry_increasing_sequence() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        let entered = state.upsert(&seen(t0, Some(50.0)), thresholds(30.0));
        let swept = state.sweep(t0 + Duration::seconds(21), thresholds(30.0));
        let recovered = state.upsert(&seen(t0 + Duration::seconds(22), Some(2.0)), thresholds(30.0));

        let seqs: Vec<u64> = entered
            .iter()
            .chain(&swept)
            .chain(&recovered)
            .map(|t| t.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_untracked_beacon_is_ignored() {
        let t0 = Utc::now();
        let mut state = seeded(t0);
        let update = SignalUpdate {
            address: BeaconAddress::new("11:22:33:44:55:66"),
            ..seen(t0, Some(50.0))
        };
        assert!(state.upsert(&update, thresholds(30.0)).is_empty());
        assert_eq!(state.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_store_task_round_trip() {
        let store = BeaconStateStore::spawn(StatusPublisher::disabled());
        let t0 = Utc::now();
        let count = store
            .track(vec![EnrolledBeacon::new(TAG_A, "Tag-A")], t0)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let transitions = store
            .upsert_from_advertisement(seen(t0, Some(40.0)), thresholds(30.0))
            .await
            .unwrap();
        assert_eq!(transitions.len(), 1);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].out_of_range);
        assert_eq!(snapshot[0].smoothed_signal, Some(-70));
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_invariants() {
        let store = BeaconStateStore::spawn(StatusPublisher::disabled());
        let t0 = Utc::now();
        store
            .track(vec![EnrolledBeacon::new(TAG_A, "Tag-A")], t0)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..50_i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let at = t0 + Duration::seconds(i);
                let distance = if i % 2 == 0 { Some(45.0) } else { None };
                store
                    .upsert_from_advertisement(seen(at, distance), thresholds(30.0))
                    .await
                    .unwrap();
                store
                    .sweep_timeouts(at + Duration::seconds(25), thresholds(30.0))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let beacon = store.get(BeaconAddress::new(TAG_A)).await.unwrap().unwrap();
        if beacon.signal_lost || beacon.estimated_distance.is_none() {
            assert!(!beacon.out_of_range);
        }
        assert_eq!(
            beacon.out_of_range,
            beacon.active_alarm_kinds.contains(&AlarmKind::DistanceExceeded)
        );
        assert_eq!(
            beacon.signal_lost,
            beacon.active_alarm_kinds.contains(&AlarmKind::SignalLost)
        );
    }

    #[tokio::test]
    async fn test_store_reports_stopped_engine() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let store = BeaconStateStore { tx };
        assert!(matches!(
            store.snapshot().await,
            Err(VeilleError::EngineStopped)
        ));
    }
}
