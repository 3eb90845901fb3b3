//! # State Reconciler
//!
//! Merges poll results into a [`ReconciledView`], detects play/pause and track
//! transitions, and decides when a pause looks like it was caused by the
//! device rather than by the user.
//!
//! ## Interruption episodes
//!
//! ```text
//!  note_external_interaction()         poll: paused, same track
//!            │                                  │
//!            ▼                                  ▼
//!   playing ──(pause within window)──> Suspected ──(next poll still paused)──> ResumeSuggested
//!                                          │                                        │
//!                                          └──── cooldown elapsed / user pause ─────┴──> idle
//! ```
//!
//! An episode yields at most one [`InterruptionSignal::ResumeSuggested`]. While
//! an episode is open, further pauses do not start a new one.
//!
//! [`StateReconciler`] is synchronous and owns no I/O. [`SharedReconciler`]
//! wraps it for concurrent use, publishes the view on a `watch` channel and
//! reports transitions on the event bus.

use crate::types::{PlaybackSnapshot, TrackRef};
use bridge_traits::time::Clock;
use core_runtime::config::InterruptionConfig;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// What changed between two consecutive poll results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Started,
    Stopped,
    TrackChanged,
}

/// Interruption heuristic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptionSignal {
    /// A pause followed a local control interaction closely enough to look external.
    Suspected { track_id: String },
    /// The interrupted track is still paused on the next poll.
    ResumeSuggested { track_id: String },
}

/// Result of applying one poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub transition: Transition,
    pub signal: Option<InterruptionSignal>,
}

/// Locally derived interpretation of remote playback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledView {
    /// `None` until the first poll, and whenever nothing is playing.
    pub current: Option<PlaybackSnapshot>,
    /// Unix epoch milliseconds of the last non-`None` transition.
    pub last_transition_at: Option<i64>,
    /// Unix epoch milliseconds of the last applied poll; `None` before the first.
    pub updated_at: Option<i64>,
    pub suspected_external_interruption: bool,
}

impl ReconciledView {
    pub fn current_track(&self) -> Option<&TrackRef> {
        self.current.as_ref().and_then(|snapshot| snapshot.item.as_ref())
    }

    pub fn is_playing(&self) -> bool {
        self.current.as_ref().is_some_and(|snapshot| snapshot.is_playing)
    }
}

#[derive(Debug, Clone)]
struct Episode {
    track_id: String,
    started_at: i64,
    resume_suggested: bool,
}

/// Pure transition and interruption detector.
pub struct StateReconciler {
    clock: Arc<dyn Clock>,
    window_ms: i64,
    cooldown_ms: i64,
    view: ReconciledView,
    last_interaction_at: Option<i64>,
    episode: Option<Episode>,
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl StateReconciler {
    pub fn new(clock: Arc<dyn Clock>, config: &InterruptionConfig) -> Self {
        Self {
            clock,
            window_ms: millis(config.window),
            cooldown_ms: millis(config.cooldown),
            view: ReconciledView::default(),
            last_interaction_at: None,
            episode: None,
        }
    }

    pub fn view(&self) -> &ReconciledView {
        &self.view
    }

    /// Record a hint that a local control (e.g. a hardware button) was used.
    pub fn note_external_interaction(&mut self) {
        self.last_interaction_at = Some(self.clock.unix_timestamp_millis());
    }

    /// Record a pause requested by the user; closes any open episode.
    pub fn note_user_pause(&mut self) {
        if self.episode.take().is_some() {
            debug!("Interruption episode closed by user pause");
        }
        self.last_interaction_at = None;
        self.view.suspected_external_interruption = false;
    }

    /// Merge one poll result. `None` means nothing is playing.
    pub fn apply(&mut self, snapshot: Option<PlaybackSnapshot>) -> Reconciliation {
        let now = self.clock.unix_timestamp_millis();
        self.expire_episode(now);

        let previous = self.view.current.take();
        let transition = transition_between(previous.as_ref(), snapshot.as_ref());

        let was_playing = previous.as_ref().is_some_and(|s| s.is_playing);
        let is_playing = snapshot.as_ref().is_some_and(|s| s.is_playing);
        let previous_track = previous.as_ref().and_then(PlaybackSnapshot::track_id);
        let current_track = snapshot
            .as_ref()
            .and_then(PlaybackSnapshot::track_id)
            .map(str::to_string);

        let mut signal = None;

        let paused_same_track = was_playing
            && !is_playing
            && current_track.is_some()
            && previous_track == current_track.as_deref();
        let recent_interaction = self
            .last_interaction_at
            .is_some_and(|at| now.saturating_sub(at) <= self.window_ms);

        if let Some(track_id) = current_track.as_ref() {
            if paused_same_track && recent_interaction && self.episode.is_none() {
                info!(
                    track_id = %track_id,
                    "Pause followed a local interaction; suspecting external interruption"
                );
                self.episode = Some(Episode {
                    track_id: track_id.clone(),
                    started_at: now,
                    resume_suggested: false,
                });
                self.last_interaction_at = None;
                signal = Some(InterruptionSignal::Suspected {
                    track_id: track_id.clone(),
                });
            } else if !is_playing {
                if let Some(episode) = self.episode.as_mut() {
                    if !episode.resume_suggested && episode.track_id == *track_id {
                        episode.resume_suggested = true;
                        signal = Some(InterruptionSignal::ResumeSuggested {
                            track_id: track_id.clone(),
                        });
                    }
                }
            }
        }

        if transition != Transition::None {
            self.view.last_transition_at = Some(now);
        }
        self.view.current = snapshot;
        self.view.updated_at = Some(now);
        self.view.suspected_external_interruption = self.episode.is_some();

        Reconciliation { transition, signal }
    }

    fn expire_episode(&mut self, now: i64) {
        let expired = self
            .episode
            .as_ref()
            .is_some_and(|episode| now.saturating_sub(episode.started_at) >= self.cooldown_ms);
        if expired {
            debug!("Interruption episode cooled down");
            self.episode = None;
            self.view.suspected_external_interruption = false;
        }
    }
}

fn transition_between(
    previous: Option<&PlaybackSnapshot>,
    next: Option<&PlaybackSnapshot>,
) -> Transition {
    let previous_track = previous.and_then(PlaybackSnapshot::track_id);
    let next_track = next.and_then(PlaybackSnapshot::track_id);
    let was_playing = previous.is_some_and(|s| s.is_playing);
    let is_playing = next.is_some_and(|s| s.is_playing);

    match (previous_track, next_track) {
        (Some(a), Some(b)) if a != b => Transition::TrackChanged,
        _ if !was_playing && is_playing => Transition::Started,
        _ if was_playing && !is_playing => Transition::Stopped,
        (a, b) if a != b => Transition::TrackChanged,
        _ => Transition::None,
    }
}

// ============================================================================
// Shared wrapper
// ============================================================================

/// Receives each poll result.
pub trait SnapshotSink: Send + Sync {
    fn accept(&self, snapshot: Option<PlaybackSnapshot>);
}

/// Thread-safe [`StateReconciler`] that publishes its view.
#[derive(Clone)]
pub struct SharedReconciler {
    inner: Arc<Mutex<StateReconciler>>,
    view_tx: Arc<watch::Sender<ReconciledView>>,
    event_bus: EventBus,
}

impl SharedReconciler {
    pub fn new(reconciler: StateReconciler, event_bus: EventBus) -> Self {
        let (view_tx, _) = watch::channel(reconciler.view().clone());
        Self {
            inner: Arc::new(Mutex::new(reconciler)),
            view_tx: Arc::new(view_tx),
            event_bus,
        }
    }

    pub fn view(&self) -> ReconciledView {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciledView> {
        self.view_tx.subscribe()
    }

    pub fn current_track(&self) -> Option<TrackRef> {
        self.view_tx.borrow().current_track().cloned()
    }

    pub fn note_external_interaction(&self) {
        self.inner.lock().note_external_interaction();
    }

    pub fn note_user_pause(&self) {
        let view = {
            let mut reconciler = self.inner.lock();
            reconciler.note_user_pause();
            reconciler.view().clone()
        };
        self.view_tx.send_replace(view);
    }

    /// Apply a poll result, publish the new view and emit events.
    pub fn apply(&self, snapshot: Option<PlaybackSnapshot>) -> Reconciliation {
        let (outcome, previous_track, view) = {
            let mut reconciler = self.inner.lock();
            let previous_track = reconciler
                .view()
                .current
                .as_ref()
                .and_then(PlaybackSnapshot::track_id)
                .map(str::to_string);
            let outcome = reconciler.apply(snapshot);
            (outcome, previous_track, reconciler.view().clone())
        };

        let current_track = view
            .current
            .as_ref()
            .and_then(PlaybackSnapshot::track_id)
            .map(str::to_string);
        self.view_tx.send_replace(view);

        match outcome.transition {
            Transition::None => {}
            Transition::Started => self.emit(PlaybackEvent::Started {
                track_id: current_track.clone(),
            }),
            Transition::Stopped => self.emit(PlaybackEvent::Stopped {
                track_id: current_track.clone().or(previous_track.clone()),
            }),
            Transition::TrackChanged => self.emit(PlaybackEvent::TrackChanged {
                from: previous_track,
                to: current_track,
            }),
        }

        match &outcome.signal {
            Some(InterruptionSignal::Suspected { track_id }) => {
                self.emit(PlaybackEvent::ExternalInterruptionSuspected {
                    track_id: track_id.clone(),
                })
            }
            Some(InterruptionSignal::ResumeSuggested { track_id }) => {
                info!(track_id = %track_id, "Suggesting resume after interruption");
                self.emit(PlaybackEvent::ResumeSuggested {
                    track_id: track_id.clone(),
                })
            }
            None => {}
        }

        outcome
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.event_bus.emit(CoreEvent::Playback(event));
    }
}

impl SnapshotSink for SharedReconciler {
    fn accept(&self, snapshot: Option<PlaybackSnapshot>) {
        self.apply(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;

    fn track(id: &str) -> TrackRef {
        TrackRef {
            id: id.to_string(),
            title: format!("Song {}", id),
            artist_names: vec!["Artist".to_string()],
            album_name: "Album".to_string(),
            album_art_url: None,
            duration_ms: 200_000,
        }
    }

    fn snapshot(id: &str, is_playing: bool) -> Option<PlaybackSnapshot> {
        Some(PlaybackSnapshot {
            item: Some(track(id)),
            is_playing,
            progress_ms: 0,
            fetched_at: 0,
        })
    }

    fn setup() -> (Arc<ManualClock>, StateReconciler) {
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        let config = InterruptionConfig {
            window: Duration::from_secs(5),
            cooldown: Duration::from_secs(30),
            ..InterruptionConfig::default()
        };
        let reconciler = StateReconciler::new(clock.clone(), &config);
        (clock, reconciler)
    }

    #[test]
    fn test_transitions() {
        let (_, mut r) = setup();

        assert_eq!(r.apply(snapshot("a", true)).transition, Transition::Started);
        assert_eq!(r.apply(snapshot("a", true)).transition, Transition::None);
        assert_eq!(r.apply(snapshot("b", true)).transition, Transition::TrackChanged);
        assert_eq!(r.apply(snapshot("b", false)).transition, Transition::Stopped);
        assert_eq!(r.apply(None).transition, Transition::TrackChanged);
        assert_eq!(r.apply(None).transition, Transition::None);
    }

    #[test]
    fn test_nothing_playing_clears_current() {
        let (_, mut r) = setup();
        r.apply(snapshot("a", true));

        let outcome = r.apply(None);

        assert_eq!(outcome.transition, Transition::Stopped);
        assert_eq!(r.view().current, None);
        assert!(r.view().last_transition_at.is_some());
    }

    #[test]
    fn test_pause_without_interaction_is_not_suspicious() {
        let (clock, mut r) = setup();
        r.apply(snapshot("a", true));
        clock.advance(Duration::from_secs(5));

        let outcome = r.apply(snapshot("a", false));

        assert_eq!(outcome.signal, None);
        assert!(!r.view().suspected_external_interruption);
    }

    #[test]
    fn test_interruption_is_suspected_once_then_resume_suggested_once() {
        let (clock, mut r) = setup();
        r.apply(snapshot("a", true));

        r.note_external_interaction();
        clock.advance(Duration::from_secs(2));
        let first = r.apply(snapshot("a", false));
        assert_eq!(
            first.signal,
            Some(InterruptionSignal::Suspected {
                track_id: "a".to_string()
            })
        );
        assert!(r.view().suspected_external_interruption);

        clock.advance(Duration::from_secs(5));
        let second = r.apply(snapshot("a", false));
        assert_eq!(
            second.signal,
            Some(InterruptionSignal::ResumeSuggested {
                track_id: "a".to_string()
            })
        );

        clock.advance(Duration::from_secs(5));
        assert_eq!(r.apply(snapshot("a", false)).signal, None);
    }

    #[test]
    fn test_repeat_interruption_within_cooldown_is_ignored() {
        let (clock, mut r) = setup();
        r.apply(snapshot("a", true));
        r.note_external_interaction();
        r.apply(snapshot("a", false));
        r.apply(snapshot("a", false)); // resume suggested

        // resumed, then interrupted again inside the cooldown
        clock.advance(Duration::from_secs(3));
        r.apply(snapshot("a", true));
        r.note_external_interaction();
        clock.advance(Duration::from_secs(1));
        assert_eq!(r.apply(snapshot("a", false)).signal, None);
        assert_eq!(r.apply(snapshot("a", false)).signal, None);
        assert!(r.view().suspected_external_interruption);
    }

    #[test]
    fn test_cooldown_expiry_allows_new_episode() {
        let (clock, mut r) = setup();
        r.apply(snapshot("a", true));
        r.note_external_interaction();
        r.apply(snapshot("a", false));

        clock.advance(Duration::from_secs(31));
        r.apply(snapshot("a", true));
        assert!(!r.view().suspected_external_interruption);

        r.note_external_interaction();
        assert!(matches!(
            r.apply(snapshot("a", false)).signal,
            Some(InterruptionSignal::Suspected { .. })
        ));
    }

    #[test]
    fn test_stale_interaction_is_ignored() {
        let (clock, mut r) = setup();
        r.apply(snapshot("a", true));
        r.note_external_interaction();
        clock.advance(Duration::from_secs(6));

        assert_eq!(r.apply(snapshot("a", false)).signal, None);
    }

    #[test]
    fn test_track_change_is_not_an_interruption() {
        let (_, mut r) = setup();
        r.apply(snapshot("a", true));
        r.note_external_interaction();

        let outcome = r.apply(snapshot("b", false));
        assert_eq!(outcome.transition, Transition::TrackChanged);
        assert_eq!(outcome.signal, None);
    }

    #[test]
    fn test_user_pause_closes_episode() {
        let (_, mut r) = setup();
        r.apply(snapshot("a", true));
        r.note_external_interaction();
        r.apply(snapshot("a", false));
        assert!(r.view().suspected_external_interruption);

        r.note_user_pause();

        assert!(!r.view().suspected_external_interruption);
        assert_eq!(r.apply(snapshot("a", false)).signal, None);
    }

    #[tokio::test]
    async fn test_shared_reconciler_publishes_and_emits() {
        let (clock, r) = setup();
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let shared = SharedReconciler::new(r, bus);
        let mut view = shared.subscribe();

        shared.accept(snapshot("a", true));
        assert!(view.has_changed().unwrap());
        assert_eq!(view.borrow_and_update().current_track().unwrap().id, "a");
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Playback(PlaybackEvent::Started {
                track_id: Some("a".to_string())
            })
        );

        shared.note_external_interaction();
        clock.advance(Duration::from_secs(1));
        shared.accept(snapshot("a", false));
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Playback(PlaybackEvent::Stopped {
                track_id: Some("a".to_string())
            })
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Playback(PlaybackEvent::ExternalInterruptionSuspected {
                track_id: "a".to_string()
            })
        );

        shared.accept(snapshot("a", false));
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Playback(PlaybackEvent::ResumeSuggested {
                track_id: "a".to_string()
            })
        );
        assert!(shared.view().suspected_external_interruption);
    }
}
