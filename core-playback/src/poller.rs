//! # Playback Poller
//!
//! Fixed-interval sampler of the remote player.
//!
//! ## Guarantees
//!
//! - At most one fetch is in flight. The fetch runs inline in the timer task
//!   and missed ticks are skipped, so a slow API never queues up requests; a
//!   one-shot [`PlaybackPoller::poll_once`] issued during a tick is skipped.
//! - Retryable failures (`Network`, `RateLimited`, `RemoteApi`, `Storage`) are
//!   retried within the tick with exponential backoff, honouring `Retry-After`.
//!   `Authentication` and `NoActiveDevice` are forwarded immediately.
//! - Once [`PlaybackPoller::stop`] returns, nothing else reaches the sink or the
//!   error channel, from the timer or from a one-shot poll that was in flight.

use crate::error::{PlaybackError, Result};
use crate::gateway::PlaybackGateway;
use crate::reconciler::SnapshotSink;
use crate::types::PlaybackSnapshot;
use core_runtime::config::PollRetryConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

struct Shared {
    gateway: Arc<dyn PlaybackGateway>,
    sink: Arc<dyn SnapshotSink>,
    errors: mpsc::UnboundedSender<PlaybackError>,
    retry: PollRetryConfig,
    /// Held for the duration of a fetch.
    fetch_lock: tokio::sync::Mutex<()>,
    /// Held while forwarding; `stop()` takes it before cancelling.
    forward_gate: Mutex<()>,
    /// Incremented by every `stop()` under `forward_gate`.
    stops: AtomicU64,
}

struct Run {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Timer-driven playback sampler.
pub struct PlaybackPoller {
    shared: Arc<Shared>,
    run: Mutex<Option<Run>>,
}

impl PlaybackPoller {
    pub fn new(
        gateway: Arc<dyn PlaybackGateway>,
        sink: Arc<dyn SnapshotSink>,
        errors: mpsc::UnboundedSender<PlaybackError>,
        retry: PollRetryConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                gateway,
                sink,
                errors,
                retry,
                fetch_lock: tokio::sync::Mutex::new(()),
                forward_gate: Mutex::new(()),
                stops: AtomicU64::new(0),
            }),
            run: Mutex::new(None),
        }
    }

    /// Start polling every `interval`, beginning immediately.
    ///
    /// Returns `false` without changing anything if already running. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.shared),
            cancel.clone(),
            interval,
        ));

        info!(interval_ms = interval.as_millis() as u64, "Playback polling started");
        *run = Some(Run { cancel, handle });
        true
    }

    /// Stop polling and discard any one-shot result still in flight.
    /// Idempotent.
    pub fn stop(&self) {
        let run = self.run.lock().take();

        {
            let _gate = self.shared.forward_gate.lock();
            self.shared.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(run) = &run {
                run.cancel.cancel();
            }
        }

        if run.is_some() {
            info!("Playback polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|r| !r.cancel.is_cancelled() && !r.handle.is_finished())
    }

    /// Fetch once outside the timer and forward the result.
    ///
    /// Returns `false` if a fetch was already in flight, or if `stop()` ran
    /// while fetching and the result was discarded.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> bool {
        let stops = self.shared.stops.load(Ordering::SeqCst);
        let Some(outcome) = self.shared.fetch().await else {
            debug!("Fetch already in flight; one-shot poll skipped");
            return false;
        };

        let _gate = self.shared.forward_gate.lock();
        if self.shared.stops.load(Ordering::SeqCst) != stops {
            debug!("Poller stopped during one-shot fetch; result discarded");
            return false;
        }
        self.shared.forward(outcome);
        true
    }
}

impl Drop for PlaybackPoller {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

async fn run_timer(shared: Arc<Shared>, cancel: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = shared.fetch() => outcome,
                };

                let Some(outcome) = outcome else {
                    debug!("Previous fetch still in flight; tick skipped");
                    continue;
                };

                let _gate = shared.forward_gate.lock();
                if cancel.is_cancelled() {
                    break;
                }
                shared.forward(outcome);
            }
        }
    }

    debug!("Poll timer exited");
}

impl Shared {
    /// `None` when another fetch holds the lock.
    async fn fetch(&self) -> Option<Result<Option<PlaybackSnapshot>>> {
        let _guard = self.fetch_lock.try_lock().ok()?;
        Some(self.fetch_with_retry().await)
    }

    async fn fetch_with_retry(&self) -> Result<Option<PlaybackSnapshot>> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.gateway.get_currently_playing().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self
                        .retry
                        .base_delay
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    let delay = e.retry_after().map_or(backoff, |after| after.max(backoff));

                    warn!(
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Playback fetch failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn forward(&self, outcome: Result<Option<PlaybackSnapshot>>) {
        match outcome {
            Ok(snapshot) => self.sink.accept(snapshot),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Playback fetch failed");
                if self.errors.send(e).is_err() {
                    debug!("Poll error channel closed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockPlaybackGateway;
    use crate::types::{Device, TrackRef};
    use async_trait::async_trait;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingSink {
        received: parking_lot::Mutex<Vec<Option<PlaybackSnapshot>>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.received.lock().len()
        }
    }

    impl SnapshotSink for RecordingSink {
        fn accept(&self, snapshot: Option<PlaybackSnapshot>) {
            self.received.lock().push(snapshot);
        }
    }

    /// Gateway whose reads take `latency` and track concurrency.
    struct SlowGateway {
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowGateway {
        fn new(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                latency,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PlaybackGateway for SlowGateway {
        async fn get_currently_playing(&self) -> Result<Option<PlaybackSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn list_devices(&self) -> Result<Vec<Device>> {
            Ok(vec![])
        }

        async fn play(&self) -> Result<()> {
            Ok(())
        }

        async fn pause(&self) -> Result<()> {
            Ok(())
        }

        async fn next(&self) -> Result<()> {
            Ok(())
        }

        async fn previous(&self) -> Result<()> {
            Ok(())
        }

        async fn like_track(&self, _track_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn playing() -> Option<PlaybackSnapshot> {
        Some(PlaybackSnapshot {
            item: Some(TrackRef {
                id: "t1".to_string(),
                title: "Song".to_string(),
                artist_names: vec![],
                album_name: String::new(),
                album_art_url: None,
                duration_ms: 0,
            }),
            is_playing: true,
            progress_ms: 0,
            fetched_at: 0,
        })
    }

    fn retry() -> PollRetryConfig {
        PollRetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
        }
    }

    fn poller(
        gateway: Arc<dyn PlaybackGateway>,
        sink: Arc<RecordingSink>,
    ) -> (PlaybackPoller, mpsc::UnboundedReceiver<PlaybackError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PlaybackPoller::new(gateway, sink, tx, retry()), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetches_never_overlap() {
        let gateway = SlowGateway::new(Duration::from_secs(12));
        let sink = Arc::new(RecordingSink::default());
        let (poller, _errors) = poller(gateway.clone(), sink.clone());

        assert!(poller.start(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(60)).await;
        poller.stop();

        assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(gateway.calls.load(Ordering::SeqCst) >= 4);
        assert!(sink.count() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_is_skipped_while_tick_in_flight() {
        let gateway = SlowGateway::new(Duration::from_secs(3));
        let sink = Arc::new(RecordingSink::default());
        let (poller, _errors) = poller(gateway.clone(), sink.clone());

        poller.start(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!poller.poll_once().await);
        assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_forwards_after_stop() {
        let gateway = SlowGateway::new(Duration::from_secs(2));
        let sink = Arc::new(RecordingSink::default());
        let (poller, _errors) = poller(gateway.clone(), sink.clone());

        poller.start(Duration::from_secs(5));
        // mid-fetch of the first tick
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop();
        let forwarded = sink.count();

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(sink.count(), forwarded);
        assert_eq!(forwarded, 0);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_in_flight_is_discarded_by_stop() {
        let gateway = SlowGateway::new(Duration::from_secs(2));
        let sink = Arc::new(RecordingSink::default());
        let (poller, mut errors) = poller(gateway.clone(), sink.clone());
        let poller = Arc::new(poller);

        poller.start(Duration::from_secs(30));
        // first tick settles at t=2s; the next one is due at t=30s
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sink.count(), 1);

        let one_shot = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.poll_once().await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        poller.stop();
        assert_eq!(sink.count(), 1);

        assert!(!one_shot.await.unwrap());
        assert_eq!(sink.count(), 1);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let gateway = SlowGateway::new(Duration::ZERO);
        let sink = Arc::new(RecordingSink::default());
        let (poller, _errors) = poller(gateway, sink);

        poller.stop();
        assert!(poller.start(Duration::from_secs(5)));
        assert!(!poller.start(Duration::from_secs(1)));
        assert!(poller.is_running());

        poller.stop();
        poller.stop();
        assert!(!poller.is_running());
        assert!(poller.start(Duration::from_secs(5)));
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_within_tick() {
        let mut gateway = MockPlaybackGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_get_currently_playing()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(PlaybackError::Network("connection reset".into())));
        gateway
            .expect_get_currently_playing()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(playing()));

        let sink = Arc::new(RecordingSink::default());
        let (poller, mut errors) = poller(Arc::new(gateway), sink.clone());

        assert!(poller.poll_once().await);

        assert_eq!(sink.received.lock().as_slice(), &[playing()]);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_forward_last_error() {
        let mut gateway = MockPlaybackGateway::new();
        gateway
            .expect_get_currently_playing()
            .times(2)
            .returning(|| {
                Err(PlaybackError::RemoteApi {
                    status: 502,
                    message: "bad gateway".into(),
                })
            });

        let sink = Arc::new(RecordingSink::default());
        let (poller, mut errors) = poller(Arc::new(gateway), sink.clone());

        poller.poll_once().await;

        assert_eq!(errors.recv().await.unwrap().kind(), "remote_api");
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        for fatal in [
            PlaybackError::NoActiveDevice,
            PlaybackError::Authentication("token revoked".into()),
        ] {
            let mut gateway = MockPlaybackGateway::new();
            let returned = fatal.clone();
            gateway
                .expect_get_currently_playing()
                .times(1)
                .returning(move || Err(returned.clone()));

            let sink = Arc::new(RecordingSink::default());
            let (poller, mut errors) = poller(Arc::new(gateway), sink);

            poller.poll_once().await;
            assert_eq!(errors.recv().await.unwrap(), fatal);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let mut gateway = MockPlaybackGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_get_currently_playing()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Err(PlaybackError::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                })
            });
        gateway
            .expect_get_currently_playing()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(None));

        let sink = Arc::new(RecordingSink::default());
        let (poller, _errors) = poller(Arc::new(gateway), sink.clone());

        let started = Instant::now();
        poller.poll_once().await;

        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(sink.received.lock().as_slice(), &[None]);
    }
}
