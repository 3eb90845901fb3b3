//! # Relay Session
//!
//! Wires the timers of one device session together:
//!
//! - an auth-presence check that starts the poller when a credential exists
//!   and stops it when the credential disappears
//! - a consumer for the poller's error channel
//! - an event listener that resumes playback when the reconciler suggests it
//! - deferred playback checks after a camera-button press
//!
//! All tasks share one cancellation token; [`RelaySession::stop`] cancels them
//! and stops the poller.

use crate::dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome};
use async_trait::async_trait;
use core_auth::{AuthCoordinator, AuthError};
use core_playback::{PlaybackError, PlaybackGateway, PlaybackPoller, SharedReconciler};
use core_runtime::config::{InterruptionConfig, PollRetryConfig, RelayConfig};
use core_runtime::events::{CoreEvent, EventBus, EventStream, PlaybackEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Button identifier reported by the device for the camera shutter.
pub const CAMERA_BUTTON_ID: &str = "camera";

/// Answers whether a credential is stored.
#[async_trait]
pub trait CredentialPresence: Send + Sync {
    async fn has_credential(&self) -> Result<bool, AuthError>;
}

#[async_trait]
impl CredentialPresence for AuthCoordinator {
    async fn has_credential(&self) -> Result<bool, AuthError> {
        AuthCoordinator::has_credential(self).await
    }
}

/// Timer settings for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub auth_check_interval: Duration,
    pub poll_retry: PollRetryConfig,
    pub interruption: InterruptionConfig,
}

impl From<&RelayConfig> for SessionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            auth_check_interval: config.auth_check_interval,
            poll_retry: config.poll_retry,
            interruption: config.interruption,
        }
    }
}

struct Context {
    presence: Arc<dyn CredentialPresence>,
    gateway: Arc<dyn PlaybackGateway>,
    reconciler: SharedReconciler,
    poller: PlaybackPoller,
    event_bus: EventBus,
    settings: SessionSettings,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// One device session.
pub struct RelaySession {
    ctx: Arc<Context>,
    dispatcher: CommandDispatcher,
    errors: Mutex<Option<mpsc::UnboundedReceiver<PlaybackError>>>,
    running: Mutex<Option<Running>>,
}

impl RelaySession {
    pub fn new(
        presence: Arc<dyn CredentialPresence>,
        gateway: Arc<dyn PlaybackGateway>,
        reconciler: SharedReconciler,
        event_bus: EventBus,
        settings: SessionSettings,
    ) -> Self {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let poller = PlaybackPoller::new(
            Arc::clone(&gateway),
            Arc::new(reconciler.clone()),
            error_tx,
            settings.poll_retry,
        );
        let dispatcher = CommandDispatcher::new(Arc::clone(&gateway), reconciler.clone());

        Self {
            ctx: Arc::new(Context {
                presence,
                gateway,
                reconciler,
                poller,
                event_bus,
                settings,
            }),
            dispatcher,
            errors: Mutex::new(Some(error_rx)),
            running: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn reconciler(&self) -> &SharedReconciler {
        &self.ctx.reconciler
    }

    pub fn is_polling(&self) -> bool {
        self.ctx.poller.is_running()
    }

    /// Start the session timers. Returns `false` if already started or
    /// stopped for good.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }
        let Some(errors) = self.errors.lock().take() else {
            warn!("Session cannot be restarted after stop");
            return false;
        };

        let cancel = CancellationToken::new();
        // Subscribe before spawning so no suggestion emitted meanwhile is lost.
        let events = EventStream::new(self.ctx.event_bus.subscribe()).filter(|event| {
            matches!(
                event,
                CoreEvent::Playback(PlaybackEvent::ResumeSuggested { .. })
            )
        });
        let tasks = vec![
            tokio::spawn(auth_presence_loop(Arc::clone(&self.ctx), cancel.clone())),
            tokio::spawn(poll_error_loop(
                Arc::clone(&self.ctx),
                errors,
                cancel.clone(),
            )),
            tokio::spawn(resume_loop(Arc::clone(&self.ctx), events, cancel.clone())),
        ];

        *running = Some(Running { cancel, tasks });
        info!("Relay session started");
        true
    }

    /// Cancel every timer and stop polling. Idempotent.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.cancel.cancel();
        self.ctx.poller.stop();
        for task in running.tasks {
            task.abort();
        }
        info!("Relay session stopped");
    }

    /// Hardware button hint. A camera press may pause playback on the device,
    /// so it is recorded and playback is re-checked after a short delay.
    pub fn on_button_press(&self, button_id: &str) {
        if button_id != CAMERA_BUTTON_ID {
            debug!(button_id, "Button press ignored");
            return;
        }

        let cancel = match self.running.lock().as_ref() {
            Some(running) => running.cancel.clone(),
            None => {
                debug!("Camera press before session start");
                return;
            }
        };

        info!("Camera button pressed; playback may be interrupted");
        self.ctx.reconciler.note_external_interaction();

        let ctx = Arc::clone(&self.ctx);
        let delay = ctx.settings.interruption.resume_check_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if ctx.poller.poll_once().await {
                        debug!("Post-camera playback check completed");
                    }
                }
            }
        });
    }

    /// Parse and dispatch one transcription. `None` when it matched no intent.
    pub async fn handle_utterance(
        &self,
        text: &str,
    ) -> Option<Result<DispatchOutcome, DispatchError>> {
        self.dispatcher.dispatch_utterance(text).await
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn auth_presence_loop(ctx: Arc<Context>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.settings.auth_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match ctx.presence.has_credential().await {
            Ok(true) => {
                if !cancel.is_cancelled() && ctx.poller.start(ctx.settings.poll_interval) {
                    info!("Credential present; playback polling enabled");
                }
            }
            Ok(false) => {
                if ctx.poller.is_running() {
                    info!("Credential removed; playback polling disabled");
                    ctx.poller.stop();
                }
            }
            Err(e) => warn!(error = %e, "Credential presence check failed"),
        }
    }
}

async fn poll_error_loop(
    ctx: Arc<Context>,
    mut errors: mpsc::UnboundedReceiver<PlaybackError>,
    cancel: CancellationToken,
) {
    loop {
        let e = tokio::select! {
            _ = cancel.cancelled() => break,
            next = errors.recv() => match next {
                Some(e) => e,
                None => break,
            },
        };

        let _ = ctx
            .event_bus
            .emit(CoreEvent::Playback(PlaybackEvent::PollFailed {
                kind: e.kind().to_string(),
                message: e.to_string(),
                retryable: e.is_retryable(),
            }));

        if matches!(e, PlaybackError::Authentication(_)) {
            // The presence check re-enables polling once a credential exists.
            warn!(error = %e, "Authentication lost; stopping playback polling");
            ctx.poller.stop();
        }
    }
}

async fn resume_loop(
    ctx: Arc<Context>,
    mut events: EventStream,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(CoreEvent::Playback(PlaybackEvent::ResumeSuggested { track_id })) => {
                if !ctx.settings.interruption.auto_resume {
                    debug!(track_id = %track_id, "Auto-resume disabled");
                    continue;
                }
                match ctx.gateway.play().await {
                    Ok(()) => info!(track_id = %track_id, "Playback resumed after interruption"),
                    Err(e) => error!(track_id = %track_id, error = %e, "Auto-resume failed"),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use core_playback::{Device, PlaybackSnapshot, StateReconciler, TrackRef};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Presence(AtomicBool);

    #[async_trait]
    impl CredentialPresence for Presence {
        async fn has_credential(&self) -> Result<bool, AuthError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    /// Serves scripted poll results, then repeats the last one.
    struct ScriptedGateway {
        reads: parking_lot::Mutex<VecDeque<core_playback::Result<Option<PlaybackSnapshot>>>>,
        last: parking_lot::Mutex<core_playback::Result<Option<PlaybackSnapshot>>>,
        plays: std::sync::atomic::AtomicUsize,
        read_count: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedGateway {
        fn new(reads: Vec<core_playback::Result<Option<PlaybackSnapshot>>>) -> Arc<Self> {
            Arc::new(Self {
                reads: parking_lot::Mutex::new(reads.into()),
                last: parking_lot::Mutex::new(Ok(None)),
                plays: Default::default(),
                read_count: Default::default(),
            })
        }
    }

    #[async_trait]
    impl PlaybackGateway for ScriptedGateway {
        async fn get_currently_playing(&self) -> core_playback::Result<Option<PlaybackSnapshot>> {
            self.read_count.fetch_add(1, Ordering::SeqCst);
            let mut last = self.last.lock();
            if let Some(next) = self.reads.lock().pop_front() {
                *last = next;
            }
            last.clone()
        }

        async fn list_devices(&self) -> core_playback::Result<Vec<Device>> {
            Ok(vec![])
        }

        async fn play(&self) -> core_playback::Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn pause(&self) -> core_playback::Result<()> {
            Ok(())
        }

        async fn next(&self) -> core_playback::Result<()> {
            Ok(())
        }

        async fn previous(&self) -> core_playback::Result<()> {
            Ok(())
        }

        async fn like_track(&self, _track_id: &str) -> core_playback::Result<()> {
            Ok(())
        }
    }

    fn snapshot(track_id: &str, is_playing: bool) -> Option<PlaybackSnapshot> {
        Some(PlaybackSnapshot {
            item: Some(TrackRef {
                id: track_id.to_string(),
                title: "Song".to_string(),
                artist_names: vec![],
                album_name: String::new(),
                album_art_url: None,
                duration_ms: 0,
            }),
            is_playing,
            progress_ms: 0,
            fetched_at: 0,
        })
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            poll_interval: Duration::from_secs(5),
            auth_check_interval: Duration::from_secs(3),
            poll_retry: PollRetryConfig::default(),
            interruption: InterruptionConfig::default(),
        }
    }

    fn session(
        presence: Arc<Presence>,
        gateway: Arc<ScriptedGateway>,
        settings: SessionSettings,
    ) -> (RelaySession, EventBus) {
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        session_with_clock(presence, gateway, settings, clock)
    }

    fn session_with_clock(
        presence: Arc<Presence>,
        gateway: Arc<ScriptedGateway>,
        settings: SessionSettings,
        clock: Arc<ManualClock>,
    ) -> (RelaySession, EventBus) {
        let bus = EventBus::default();
        let reconciler = SharedReconciler::new(
            StateReconciler::new(clock, &settings.interruption),
            bus.clone(),
        );
        (
            RelaySession::new(presence, gateway, reconciler, bus.clone(), settings),
            bus,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_follows_credential_presence() {
        let presence = Arc::new(Presence(AtomicBool::new(false)));
        let gateway = ScriptedGateway::new(vec![]);
        let (session, _bus) = session(presence.clone(), gateway.clone(), settings());

        assert!(session.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!session.is_polling());

        presence.0.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(session.is_polling());

        presence.0.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!session.is_polling());

        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_error_stops_polling() {
        let presence = Arc::new(Presence(AtomicBool::new(true)));
        let gateway = ScriptedGateway::new(vec![Err(PlaybackError::Authentication(
            "revoked".into(),
        ))]);
        let (session, bus) = session(presence.clone(), gateway, settings());
        let mut events = bus.subscribe();

        session.start();

        let failed = loop {
            if let CoreEvent::Playback(PlaybackEvent::PollFailed { kind, .. }) =
                events.recv().await.unwrap()
            {
                break kind;
            }
        };
        assert_eq!(failed, "authentication");

        // Credential is gone before the presence check can restart polling.
        presence.0.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!session.is_polling());

        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_press_leads_to_auto_resume() {
        let presence = Arc::new(Presence(AtomicBool::new(true)));
        let gateway = ScriptedGateway::new(vec![
            Ok(snapshot("t1", true)),
            Ok(snapshot("t1", false)),
        ]);
        let (session, bus) = session(presence, gateway.clone(), settings());
        let mut events = bus.subscribe();

        session.start();
        // First tick reads "playing".
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(session.reconciler().view().is_playing());

        session.on_button_press(CAMERA_BUTTON_ID);
        // Delayed check sees the pause, the next tick sees it again.
        tokio::time::sleep(Duration::from_secs(6)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Playback(event) = event {
                seen.push(event);
            }
        }
        assert!(seen.contains(&PlaybackEvent::ExternalInterruptionSuspected {
            track_id: "t1".into()
        }));
        assert!(seen.contains(&PlaybackEvent::ResumeSuggested {
            track_id: "t1".into()
        }));
        assert_eq!(gateway.plays.load(Ordering::SeqCst), 1);

        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_camera_hint_does_not_suggest_resume() {
        let presence = Arc::new(Presence(AtomicBool::new(true)));
        let gateway = ScriptedGateway::new(vec![
            Ok(snapshot("t1", true)),
            Ok(snapshot("t1", false)),
        ]);
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        let settings = settings();
        let (session, bus) =
            session_with_clock(presence, gateway.clone(), settings, clock.clone());
        let mut events = bus.subscribe();

        session.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(session.reconciler().view().is_playing());

        session.on_button_press(CAMERA_BUTTON_ID);
        // The pause is only observed once the hint is older than the window.
        clock.advance(settings.interruption.window + Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(!session.reconciler().view().is_playing());
        assert!(!session.reconciler().view().suspected_external_interruption);

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(
                event,
                CoreEvent::Playback(
                    PlaybackEvent::ExternalInterruptionSuspected { .. }
                        | PlaybackEvent::ResumeSuggested { .. }
                )
            ));
        }
        assert_eq!(gateway.plays.load(Ordering::SeqCst), 0);

        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_resume_can_be_disabled() {
        let presence = Arc::new(Presence(AtomicBool::new(true)));
        let gateway = ScriptedGateway::new(vec![
            Ok(snapshot("t1", true)),
            Ok(snapshot("t1", false)),
        ]);
        let mut settings = settings();
        settings.interruption.auto_resume = false;
        let (session, _bus) = session(presence, gateway.clone(), settings);

        session.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.on_button_press(CAMERA_BUTTON_ID);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(session.reconciler().view().suspected_external_interruption);
        assert_eq!(gateway.plays.load(Ordering::SeqCst), 0);

        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_buttons_are_ignored() {
        let presence = Arc::new(Presence(AtomicBool::new(false)));
        let gateway = ScriptedGateway::new(vec![]);
        let (session, _bus) = session(presence, gateway.clone(), settings());

        session.start();
        session.on_button_press("volume_up");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(gateway.read_count.load(Ordering::SeqCst), 0);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let presence = Arc::new(Presence(AtomicBool::new(true)));
        let gateway = ScriptedGateway::new(vec![]);
        let (session, _bus) = session(presence, gateway.clone(), settings());

        session.stop();
        assert!(session.start());
        assert!(!session.start());
        tokio::time::sleep(Duration::from_secs(1)).await;

        session.stop();
        session.stop();
        let reads = gateway.read_count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!session.is_polling());
        assert_eq!(gateway.read_count.load(Ordering::SeqCst), reads);
        assert!(!session.start());
    }
}
