//! Live status stream.
//!
//! Pushes the latest beacon snapshot and alarm list as server-sent events,
//! starting with the current values. Intermediate updates may be coalesced;
//! every event carries the full list.

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use tokio::sync::watch;
use veille_core::{AlarmEvent, BeaconRuntimeState, WatchStatusSink};

use crate::state::SharedState;

/// Event name carrying a `Vec<BeaconRuntimeState>`.
pub const BEACONS_EVENT: &str = "beacons";
/// Event name carrying a `Vec<AlarmEvent>`.
pub const ALARMS_EVENT: &str = "alarms";

/// Creates the events router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(stream_events))
}

struct Subscription {
    beacons: watch::Receiver<Vec<BeaconRuntimeState>>,
    alarms: watch::Receiver<Vec<AlarmEvent>>,
}

impl Subscription {
    fn new(status: &Arc<WatchStatusSink>) -> Self {
        let mut beacons = status.subscribe_beacons();
        let mut alarms = status.subscribe_alarms();
        beacons.mark_changed();
        alarms.mark_changed();
        Self { beacons, alarms }
    }

    /// Wait for the next change; `None` once the engine is gone.
    async fn next_event(&mut self) -> Option<Result<Event, axum::Error>> {
        tokio::select! {
            biased;
            changed = self.beacons.changed() => {
                changed.ok()?;
                let beacons = self.beacons.borrow_and_update().clone();
                Some(Event::default().event(BEACONS_EVENT).json_data(beacons))
            }
            changed = self.alarms.changed() => {
                changed.ok()?;
                let alarms = self.alarms.borrow_and_update().clone();
                Some(Event::default().event(ALARMS_EVENT).json_data(alarms))
            }
        }
    }
}

/// Stream beacon and alarm updates.
#[utoipa::path(
    get,
    path = "/events",
    tag = "beacons",
    operation_id = "streamEvents",
    summary = "Stream live status",
    description = "Server-sent events. A `beacons` event carries every tracked \
        beacon state; an `alarms` event carries every open alarm, newest first. \
        Both are sent once on connect, then whenever they change.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream")
    )
)]
pub async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = Subscription::new(&state.read().await.status);
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.next_event().await?;
        Some((event, subscription))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
