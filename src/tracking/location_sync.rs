use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use prometheus::IntCounter;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::session;
use crate::state::AppState;

/// Where synced rider positions go.
#[async_trait]
pub trait LocationSink: Send + Sync + 'static {
    async fn record(&self, rider_id: u64, point: GeoPoint) -> Result<(), AppError>;
}

pub struct StateLocationSink {
    state: Arc<AppState>,
}

impl StateLocationSink {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl LocationSink for StateLocationSink {
    async fn record(&self, rider_id: u64, point: GeoPoint) -> Result<(), AppError> {
        session::record_location(&self.state, rider_id, point)
    }
}

/// Forwards a rider's position samples to a sink on a fixed interval.
///
/// The sample stream yields `None` when the device cannot produce a
/// position (e.g. permission denied); those are skipped. Only the most
/// recent sample is sent per tick.
pub struct LocationSync<S> {
    rider_id: u64,
    sink: Arc<S>,
    interval: Duration,
    failures: Option<IntCounter>,
}

impl<S: LocationSink> LocationSync<S> {
    pub fn new(rider_id: u64, sink: Arc<S>, interval: Duration) -> Self {
        Self {
            rider_id,
            sink,
            interval,
            failures: None,
        }
    }

    pub fn with_failure_counter(mut self, counter: IntCounter) -> Self {
        self.failures = Some(counter);
        self
    }

    /// The watch stream and the timer live in one task, so stopping the
    /// handle tears both down together. The task also ends with the stream.
    pub fn spawn<St>(self, samples: St) -> LocationSyncHandle
    where
        St: Stream<Item = Option<GeoPoint>> + Send + Unpin + 'static,
    {
        LocationSyncHandle {
            task: tokio::spawn(self.run(samples)),
        }
    }

    async fn run<St>(self, mut samples: St)
    where
        St: Stream<Item = Option<GeoPoint>> + Send + Unpin,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut unsent: Option<GeoPoint> = None;

        loop {
            tokio::select! {
                sample = samples.next() => match sample {
                    Some(Some(point)) => unsent = Some(point),
                    Some(None) => debug!(rider_id = self.rider_id, "position unavailable; sample skipped"),
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Some(point) = unsent.take() {
                        if !self.send(point).await {
                            unsent = Some(point);
                        }
                    }
                }
            }
        }

        if let Some(point) = unsent {
            self.send(point).await;
        }
        debug!(rider_id = self.rider_id, "location sync finished");
    }

    async fn send(&self, point: GeoPoint) -> bool {
        match self.sink.record(self.rider_id, point).await {
            Ok(()) => true,
            Err(err) => {
                warn!(rider_id = self.rider_id, error = %err, "location sync failed; retrying next tick");
                if let Some(failures) = &self.failures {
                    failures.inc();
                }
                false
            }
        }
    }
}

pub struct LocationSyncHandle {
    task: JoinHandle<()>,
}

impl LocationSyncHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the sample stream has ended and the last sample was flushed.
    pub async fn wait(&mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Drop for LocationSyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The feed currently syncing for a rider, as held in `AppState`.
pub struct RegisteredSync {
    generation: u64,
    abort: AbortHandle,
}

/// Records `handle` as the rider's only feed and stops the one it replaces.
/// The returned generation is handed back to [`unregister`].
pub fn register(state: &AppState, rider_id: u64, handle: &LocationSyncHandle) -> u64 {
    let generation = state.next_id();
    let replaced = state.location_syncs.insert(
        rider_id,
        RegisteredSync {
            generation,
            abort: handle.task.abort_handle(),
        },
    );
    if let Some(previous) = replaced {
        previous.abort.abort();
        debug!(rider_id, "replaced running location feed");
    }
    generation
}

pub fn unregister(state: &AppState, rider_id: u64, generation: u64) {
    state
        .location_syncs
        .remove_if(&rider_id, |_, sync| sync.generation == generation);
}

/// Tears down the rider's feed, watch and timer together.
pub fn stop_for_rider(state: &AppState, rider_id: u64) -> bool {
    match state.location_syncs.remove(&rider_id) {
        Some((_, sync)) => {
            sync.abort.abort();
            info!(rider_id, "location feed stopped");
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use prometheus::IntCounter;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::{register, LocationSink, LocationSync, StateLocationSink};
    use crate::config::Config;
    use crate::error::AppError;
    use crate::geo::GeoPoint;
    use crate::models::rider::Rider;
    use crate::otp::InMemoryOtpVerifier;
    use crate::session;
    use crate::state::AppState;
    use crate::tracking::routing::StraightLineRoutingProvider;

    #[derive(Default)]
    struct RecordingSink {
        points: Mutex<Vec<GeoPoint>>,
    }

    #[async_trait]
    impl LocationSink for RecordingSink {
        async fn record(&self, _rider_id: u64, point: GeoPoint) -> Result<(), AppError> {
            self.points.lock().unwrap().push(point);
            Ok(())
        }
    }

    /// Fails the first `failures` calls.
    struct FlakySink {
        failures: usize,
        calls: AtomicUsize,
        points: Mutex<Vec<GeoPoint>>,
    }

    #[async_trait]
    impl LocationSink for FlakySink {
        async fn record(&self, _rider_id: u64, point: GeoPoint) -> Result<(), AppError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::Upstream("sink offline".to_string()));
            }
            self.points.lock().unwrap().push(point);
            Ok(())
        }
    }

    fn point(lat: f64) -> GeoPoint {
        GeoPoint { lat, lng: 73.85 }
    }

    #[tokio::test]
    async fn sends_latest_sample_and_skips_unknown_positions() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let handle = LocationSync::new(7, sink.clone(), Duration::from_millis(20))
            .spawn(ReceiverStream::new(rx));

        tx.send(None).await.unwrap();
        tx.send(Some(point(18.51))).await.unwrap();
        tx.send(Some(point(18.52))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let sent = sink.points.lock().unwrap().clone();
        assert_eq!(sent.last().map(|p| p.lat), Some(18.52));
        handle.stop();
    }

    #[tokio::test]
    async fn failed_sends_are_retried_on_the_next_tick() {
        let sink = Arc::new(FlakySink {
            failures: 1,
            calls: AtomicUsize::new(0),
            points: Mutex::new(Vec::new()),
        });
        let counter = IntCounter::new("test_location_sync_failures", "test").unwrap();
        let (tx, rx) = mpsc::channel(8);
        let _handle = LocationSync::new(7, sink.clone(), Duration::from_millis(20))
            .with_failure_counter(counter.clone())
            .spawn(ReceiverStream::new(rx));

        tx.send(Some(point(18.53))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.get(), 1);
        assert_eq!(sink.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stopping_tears_down_stream_and_timer() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let handle = LocationSync::new(7, sink.clone(), Duration::from_millis(10))
            .spawn(ReceiverStream::new(rx));

        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The stream was dropped with the task.
        assert!(tx.send(Some(point(18.5))).await.is_err());
        assert!(sink.points.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn task_ends_when_the_stream_ends() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let handle = LocationSync::new(7, sink.clone(), Duration::from_secs(60))
            .spawn(ReceiverStream::new(rx));

        tx.send(Some(point(18.54))).await.unwrap();
        drop(tx);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(handle.is_finished());
        assert_eq!(sink.points.lock().unwrap().len(), 1);
    }

    fn state_with_rider(online: bool) -> Arc<AppState> {
        let (state, _rx) = AppState::new(
            Config::default(),
            Arc::new(StraightLineRoutingProvider::new(20.0)),
            Arc::new(InMemoryOtpVerifier::default()),
        );
        state.riders.insert(
            7,
            Rider {
                id: 7,
                shop_id: 1,
                name: "Ravi".to_string(),
                phone: "9000000001".to_string(),
                is_available: online,
                is_verified: true,
                location: None,
                location_updated_at: None,
                total_deliveries: 0,
                rating: 4.6,
                updated_at: Utc::now(),
            },
        );
        Arc::new(state)
    }

    #[tokio::test]
    async fn going_offline_stops_the_rider_feed() {
        let state = state_with_rider(true);
        let (tx, rx) = mpsc::channel(8);
        let handle = LocationSync::new(
            7,
            Arc::new(StateLocationSink::new(state.clone())),
            Duration::from_millis(10),
        )
        .spawn(ReceiverStream::new(rx));
        register(&state, 7, &handle);

        let session = session::toggle_online(&state, 7).unwrap();
        assert!(!session.is_online());
        assert!(!state.location_syncs.contains_key(&7));

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(handle.is_finished());
        assert!(tx.send(Some(point(18.5))).await.is_err());
        assert!(state.riders.get(&7).unwrap().location.is_none());
    }

    #[tokio::test]
    async fn offline_rider_samples_are_refused() {
        let state = state_with_rider(false);

        let result = session::record_location(&state, 7, point(18.5));

        assert!(matches!(result, Err(AppError::Precondition(_))));
        assert!(state.riders.get(&7).unwrap().location.is_none());
    }

    #[tokio::test]
    async fn a_new_feed_replaces_the_running_one() {
        let state = state_with_rider(true);
        let sink = Arc::new(RecordingSink::default());
        let (_first_tx, first_rx) = mpsc::channel(8);
        let (_second_tx, second_rx) = mpsc::channel(8);

        let first = LocationSync::new(7, sink.clone(), Duration::from_secs(60))
            .spawn(ReceiverStream::new(first_rx));
        register(&state, 7, &first);
        let second = LocationSync::new(7, sink, Duration::from_secs(60))
            .spawn(ReceiverStream::new(second_rx));
        register(&state, 7, &second);

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(first.is_finished());
        assert!(!second.is_finished());
        assert_eq!(state.location_syncs.len(), 1);
    }
}
