//! The radio scanner seam.
//!
//! A [`RadioScanner`] pushes [`ScanEvent`]s into an mpsc channel handed to it
//! at [`RadioScanner::start`]. The monitor consumes that channel from a single
//! ingestion task. The BlueZ implementation lives in [`crate::bluetooth`];
//! [`MockRadioScanner`] is a synthetic source for tests and for machines
//! without a radio.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::Advertisement;

/// Something delivered by a running scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// One detection.
    Advertisement(Advertisement),
    /// The platform aborted the scan.
    Failed {
        /// Platform failure code.
        code: i32,
    },
}

/// Capacity of the channel between a scanner and the ingestion task.
pub const SCAN_EVENT_QUEUE_DEPTH: usize = 1024;

/// Physical (or synthetic) advertisement source.
#[async_trait]
pub trait RadioScanner: Send + Sync {
    /// Begin scanning and deliver events to `events` until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VeilleError::AccessDenied`] or
    /// [`crate::VeilleError::RadioUnavailable`] if the scan cannot start.
    async fn start(&self, events: mpsc::Sender<ScanEvent>) -> Result<()>;

    /// Stop scanning. Stopping an idle scanner is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses; the scan is considered
    /// stopped regardless.
    async fn stop(&self) -> Result<()>;
}

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::{MockRadioScanner, MockStartFailure};

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock {
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Mutex;
    use tracing::{debug, info};

    use super::*;
    use crate::error::VeilleError;

    /// How a [`MockRadioScanner`] refuses to start.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockStartFailure {
        /// Report missing authorization.
        AccessDenied,
        /// Report a missing or powered-off adapter.
        RadioUnavailable,
    }

    /// Scanner driven by the caller.
    ///
    /// Events are injected with [`MockRadioScanner::emit`] and
    /// [`MockRadioScanner::fail`].
    #[derive(Debug, Default)]
    pub struct MockRadioScanner {
        events: Mutex<Option<mpsc::Sender<ScanEvent>>>,
        start_failure: Mutex<Option<MockStartFailure>>,
        fail_stop: AtomicBool,
        stop_delay_millis: AtomicU64,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl MockRadioScanner {
        /// Create an idle scanner that starts successfully.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent starts fail (or succeed again with `None`).
        pub async fn set_start_failure(&self, failure: Option<MockStartFailure>) {
            *self.start_failure.lock().await = failure;
        }

        /// Make `stop` report an error after releasing the scan.
        pub fn set_fail_stop(&self, fail: bool) {
            self.fail_stop.store(fail, Ordering::SeqCst);
        }

        /// Make `stop` take `delay` before releasing the scan, like a slow
        /// adapter. The call is counted as soon as it begins.
        pub fn set_stop_delay(&self, delay: Duration) {
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.stop_delay_millis.store(millis, Ordering::SeqCst);
        }

        /// Deliver an advertisement. Returns `false` if no scan is running.
        pub async fn emit(&self, advertisement: Advertisement) -> bool {
            self.send(ScanEvent::Advertisement(advertisement)).await
        }

        /// Report a mid-scan failure. Returns `false` if no scan is running.
        pub async fn fail(&self, code: i32) -> bool {
            self.send(ScanEvent::Failed { code }).await
        }

        /// Whether a scan is running.
        pub async fn is_scanning(&self) -> bool {
            self.events.lock().await.is_some()
        }

        /// Number of successful starts.
        #[must_use]
        pub fn start_count(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        /// Number of stop calls.
        #[must_use]
        pub fn stop_count(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }

        async fn send(&self, event: ScanEvent) -> bool {
            let tx = self.events.lock().await.clone();
            match tx {
                Some(tx) => tx.send(event).await.is_ok(),
                None => false,
            }
        }
    }

    #[async_trait]
    impl RadioScanner for MockRadioScanner {
        async fn start(&self, events: mpsc::Sender<ScanEvent>) -> Result<()> {
            match *self.start_failure.lock().await {
                Some(MockStartFailure::AccessDenied) => {
                    return Err(VeilleError::AccessDenied(
                        "mock scanner not authorized".to_string(),
                    ))
                }
                Some(MockStartFailure::RadioUnavailable) => {
                    return Err(VeilleError::RadioUnavailable(
                        "mock adapter powered off".to_string(),
                    ))
                }
                None => {}
            }

            *self.events.lock().await = Some(events);
            self.starts.fetch_add(1, Ordering::SeqCst);
            info!("Mock scan started");
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            let delay = self.stop_delay_millis.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.events.lock().await.take().is_some() {
                debug!("Mock scan stopped");
            }
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(VeilleError::AccessDenied(
                    "mock scanner refused to stop".to_string(),
                ));
            }
            Ok(())
        }
    }

}
