//! Periodic timeout sweep.
//!
//! A silent beacon produces no event, so signal loss can only be found by
//! polling. The sweeper asks the store to re-evaluate every tracked beacon on
//! a fixed period and forwards the transitions to the alarm coordinator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::alarm::AlarmCoordinator;
use crate::config::ConfigStore;
use crate::error::{Result, VeilleError};
use crate::store::{BeaconStateStore, Thresholds};
use crate::types::Transition;

/// Drives [`BeaconStateStore::sweep_timeouts`].
#[derive(Debug, Clone)]
pub struct TimeoutSweeper {
    store: BeaconStateStore,
    alarms: Arc<AlarmCoordinator>,
    config: ConfigStore,
}

impl TimeoutSweeper {
    /// Create a sweeper.
    pub fn new(
        store: BeaconStateStore,
        alarms: Arc<AlarmCoordinator>,
        config: ConfigStore,
    ) -> Self {
        Self {
            store,
            alarms,
            config,
        }
    }

    /// Run one sweep as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`VeilleError::EngineStopped`] if the state store is gone.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Transition>> {
        let thresholds = Thresholds::from(self.config.get().as_ref());
        let transitions = self.store.sweep_timeouts(now, thresholds).await?;
        if !transitions.is_empty() {
            debug!(count = transitions.len(), "Sweep produced transitions");
        }
        self.alarms.apply(&transitions).await;
        Ok(transitions)
    }

    /// Sweep every `sweep_interval_millis` until `shutdown` fires.
    ///
    /// The period follows configuration changes from the next tick on.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut period_ms = self.config.get().sweep_interval_millis;
        let mut interval = sweep_interval(period_ms);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(_) => {}
                        Err(VeilleError::EngineStopped) => {
                            warn!("State store gone, sweeper stopping");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Sweep failed"),
                    }

                    let configured = self.config.get().sweep_interval_millis;
                    if configured != period_ms {
                        debug!(from = period_ms, to = configured, "Sweep period changed");
                        period_ms = configured;
                        interval = sweep_interval(period_ms);
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    }
}

/// Interval whose first tick is one full period away.
fn sweep_interval(period_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(period_ms.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
