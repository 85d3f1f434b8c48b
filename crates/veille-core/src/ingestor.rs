//! Advertisement ingestion.
//!
//! Turns raw detections into state updates: filter on enrolled beacons,
//! smooth, estimate distance, apply to the store and hand the resulting
//! transitions to the alarm coordinator. One ingestor runs per monitoring
//! session inside a single task, so events are processed in arrival order.
//!
//! A beacon heard again after a silence longer than the loss timeout starts
//! with an empty smoothing window, so readings from before the gap do not
//! skew its first distance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};

use crate::alarm::AlarmCoordinator;
use crate::config::ConfigStore;
use crate::error::{Result, VeilleError};
use crate::estimator::PathLossModel;
use crate::scanner::ScanEvent;
use crate::smoother::SignalSmoother;
use crate::store::{BeaconStateStore, SignalUpdate, Thresholds};
use crate::types::{Advertisement, BeaconAddress, EnrolledBeacon, Transition};

/// Processes advertisements for a fixed set of enrolled beacons.
#[derive(Debug)]
pub struct AdvertisementIngestor {
    enrolled: HashMap<BeaconAddress, EnrolledBeacon>,
    smoother: SignalSmoother,
    last_heard: HashMap<BeaconAddress, DateTime<Utc>>,
    store: BeaconStateStore,
    alarms: Arc<AlarmCoordinator>,
    config: ConfigStore,
}

impl AdvertisementIngestor {
    /// Create an ingestor accepting only `enrolled` beacons.
    pub fn new(
        enrolled: &[EnrolledBeacon],
        store: BeaconStateStore,
        alarms: Arc<AlarmCoordinator>,
        config: ConfigStore,
    ) -> Self {
        let smoother = SignalSmoother::new(config.get().smoothing_window_size);
        Self {
            enrolled: enrolled
                .iter()
                .map(|beacon| (beacon.address.clone(), beacon.clone()))
                .collect(),
            smoother,
            last_heard: HashMap::new(),
            store,
            alarms,
            config,
        }
    }

    /// Process one advertisement received at `now`.
    ///
    /// Advertisements from unknown addresses are dropped. Returns the
    /// transitions that were forwarded to the alarm coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the state store is gone.
    pub async fn on_advertisement(
        &mut self,
        advertisement: Advertisement,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transition>> {
        let Some(beacon) = self.enrolled.get(&advertisement.address) else {
            trace!(address = %advertisement.address, "Ignoring unenrolled device");
            return Ok(Vec::new());
        };

        let config = self.config.get();
        let timeout = i64::try_from(config.signal_loss_timeout_millis).unwrap_or(i64::MAX);
        if let Some(previous) = self.last_heard.insert(advertisement.address.clone(), now) {
            let silent_for = (now - previous).num_milliseconds();
            if silent_for > timeout {
                debug!(beacon = %beacon.name, silent_for_ms = silent_for, "Smoothing restarted");
                self.smoother.forget(&advertisement.address);
            }
        }
        self.smoother.set_window_size(config.smoothing_window_size);
        let smoothed = self
            .smoother
            .observe(&advertisement.address, advertisement.rssi);

        let model = PathLossModel::from(config.as_ref());
        let reference =
            model.reference_signal(advertisement.tx_power, beacon.reference_signal_at_1m);
        let distance = model.estimate(smoothed, reference);
        trace!(
            beacon = %beacon.name,
            raw = advertisement.rssi,
            smoothed,
            reference,
            distance = ?distance,
            "Advertisement processed"
        );

        let update = SignalUpdate {
            address: advertisement.address,
            smoothed_signal: smoothed,
            estimated_distance: distance,
            seen_at: now,
        };
        let transitions = self
            .store
            .upsert_from_advertisement(update, Thresholds::from(config.as_ref()))
            .await?;
        self.alarms.apply(&transitions).await;
        Ok(transitions)
    }

    /// Consume scan events until shutdown, the end of the scan, or a scan
    /// failure. A failure code is reported through `failure`.
    pub(crate) async fn run(
        mut self,
        mut events: mpsc::Receiver<ScanEvent>,
        mut shutdown: watch::Receiver<bool>,
        failure: oneshot::Sender<i32>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(ScanEvent::Advertisement(advertisement)) => {
                        match self.on_advertisement(advertisement, Utc::now()).await {
                            Ok(_) => {}
                            Err(VeilleError::EngineStopped) => {
                                warn!("State store gone, ingestion stopping");
                                break;
                            }
                            Err(e) => warn!(error = %e, "Advertisement dropped"),
                        }
                    }
                    Some(ScanEvent::Failed { code }) => {
                        error!(code, "Radio scan failed");
                        let _ = failure.send(code);
                        return;
                    }
                    None => break,
                },
            }
        }
        debug!("Ingestion stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::MonitorConfig;
    use crate::sink::testing::{RecordingAlarmSink, SinkCall};
    use crate::sink::{AlarmSink, StatusPublisher};
    use crate::types::{AlarmKind, TransitionEdge};

    const TAG_A: &str = "AA:BB:CC:DD:EE:01";

    async fn ingestor(
        config: MonitorConfig,
        enrolled: &[EnrolledBeacon],
    ) -> (AdvertisementIngestor, Arc<RecordingAlarmSink>) {
        let config = ConfigStore::new(config);
        let sink = Arc::new(RecordingAlarmSink::default());
        let alarms = Arc::new(AlarmCoordinator::new(
            sink.clone(),
            config.clone(),
            StatusPublisher::disabled(),
        ));
        let store = BeaconStateStore::spawn(StatusPublisher::disabled());
        store.track(enrolled.to_vec(), Utc::now()).await.unwrap();
        (
            AdvertisementIngestor::new(enrolled, store, alarms, config),
            sink,
        )
    }

    #[tokio::test]
    async fn test_tag_a_beyond_threshold_raises_alarm() {
        let config = MonitorConfig {
            distance_threshold_meters: 8.0,
            ..MonitorConfig::default()
        };
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A").with_reference_signal(-59);
        let (mut ingestor, sink) = ingestor(config, &[tag_a]).await;

        let transitions = ingestor
            .on_advertisement(Advertisement::new(TAG_A, -79), Utc::now())
            .await
            .unwrap();

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, AlarmKind::DistanceExceeded);
        assert_eq!(transitions[0].edge, TransitionEdge::Entered);
        assert_eq!(transitions[0].message, "Tag-A at 10m - Out of range!");
        assert_eq!(sink.calls(), vec![SinkCall::Play(80)]);

        let state = ingestor
            .store
            .get(BeaconAddress::new(TAG_A))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.estimated_distance, Some(10.0));
        assert_eq!(ingestor.alarms.active_alarms().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unenrolled_device_is_dropped() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A");
        let (mut ingestor, sink) = ingestor(MonitorConfig::default(), &[tag_a]).await;

        let transitions = ingestor
            .on_advertisement(Advertisement::new("11:22:33:44:55:66", -95), Utc::now())
            .await
            .unwrap();
        assert!(transitions.is_empty());
        assert!(sink.calls().is_empty());
        let stranger = BeaconAddress::new("11:22:33:44:55:66");
        assert_eq!(ingestor.smoother.sample_count(&stranger), 0);
    }

    #[tokio::test]
    async fn test_advertised_reference_takes_precedence() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A").with_reference_signal(-70);
        let (mut ingestor, _) = ingestor(MonitorConfig::default(), &[tag_a]).await;

        ingestor
            .on_advertisement(Advertisement::new(TAG_A, -69).with_tx_power(-49), Utc::now())
            .await
            .unwrap();
        let state = ingestor
            .store
            .get(BeaconAddress::new(TAG_A))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.estimated_distance, Some(10.0));
    }

    #[tokio::test]
    async fn test_weak_signal_gives_unknown_distance() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A");
        let (mut ingestor, _) = ingestor(MonitorConfig::default(), &[tag_a]).await;

        let transitions = ingestor
            .on_advertisement(Advertisement::new(TAG_A, -90), Utc::now())
            .await
            .unwrap();
        assert!(transitions.is_empty());

        let state = ingestor
            .store
            .get(BeaconAddress::new(TAG_A))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.smoothed_signal, Some(-90));
        assert_eq!(state.estimated_distance, None);
        assert!(state.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_readings_are_smoothed_before_estimation() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A");
        let (mut ingestor, _) = ingestor(MonitorConfig::default(), &[tag_a]).await;

        for raw in [-60, -62, -58, -61, -60] {
            ingestor
                .on_advertisement(Advertisement::new(TAG_A, raw), Utc::now())
                .await
                .unwrap();
        }
        let state = ingestor
            .store
            .get(BeaconAddress::new(TAG_A))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.smoothed_signal, Some(-60));
    }

    #[tokio::test]
    async fn test_smoothing_restarts_after_long_silence() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A");
        let (mut ingestor, _) = ingestor(MonitorConfig::default(), &[tag_a]).await;
        let address = BeaconAddress::new(TAG_A);
        let t0 = Utc::now();

        ingestor
            .on_advertisement(Advertisement::new(TAG_A, -90), t0)
            .await
            .unwrap();
        ingestor
            .on_advertisement(Advertisement::new(TAG_A, -80), t0 + Duration::seconds(19))
            .await
            .unwrap();
        assert_eq!(ingestor.smoother.sample_count(&address), 2);

        ingestor
            .on_advertisement(Advertisement::new(TAG_A, -60), t0 + Duration::seconds(40))
            .await
            .unwrap();
        assert_eq!(ingestor.smoother.sample_count(&address), 1);
        let state = ingestor.store.get(address).await.unwrap().unwrap();
        assert_eq!(state.smoothed_signal, Some(-60));
    }

    #[tokio::test]
    async fn test_stale_loss_does_not_outlive_recovery() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A");
        let (mut ingestor, sink) = ingestor(MonitorConfig::default(), &[tag_a]).await;
        let t0 = Utc::now();
        ingestor
            .on_advertisement(Advertisement::new(TAG_A, -60), t0)
            .await
            .unwrap();

        // A sweep finds the loss, but its transitions reach the coordinator
        // only after the recovering advertisement has been applied.
        let swept = ingestor
            .store
            .sweep_timeouts(t0 + Duration::seconds(21), Thresholds::default())
            .await
            .unwrap();
        assert_eq!(swept[0].kind, AlarmKind::SignalLost);
        let recovered = ingestor
            .on_advertisement(Advertisement::new(TAG_A, -60), t0 + Duration::seconds(22))
            .await
            .unwrap();
        assert_eq!(recovered[0].edge, TransitionEdge::Exited);
        ingestor.alarms.apply(&swept).await;

        let state = ingestor
            .store
            .get(BeaconAddress::new(TAG_A))
            .await
            .unwrap()
            .unwrap();
        assert!(!state.signal_lost);
        assert!(ingestor.alarms.active_alarms().await.is_empty());
        assert!(!sink.is_playing());
        assert_eq!(sink.play_count(), 0);
    }

    #[tokio::test]
    async fn test_run_reports_scan_failure() {
        let tag_a = EnrolledBeacon::new(TAG_A, "Tag-A");
        let (ingestor, _) = ingestor(MonitorConfig::default(), &[tag_a]).await;

        let (tx, rx) = mpsc::channel(4);
        let (_shutdown, shutdown_rx) = watch::channel(false);
        let (failure_tx, failure_rx) = oneshot::channel();
        let handle = tokio::spawn(ingestor.run(rx, shutdown_rx, failure_tx));

        tx.send(ScanEvent::Advertisement(Advertisement::new(TAG_A, -60)))
            .await
            .unwrap();
        tx.send(ScanEvent::Failed { code: 133 }).await.unwrap();

        assert_eq!(failure_rx.await.unwrap(), 133);
        handle.await.unwrap();
    }
}
