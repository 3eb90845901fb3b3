//! # Event Bus System
//!
//! Typed, in-process event broadcasting built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The relay has several independent activities (poll timer, auth-presence
//! check, button-triggered one-shots, HTTP handlers). They report what happened
//! through an [`EventBus`] owned by the session and handed to each component
//! explicitly. There is no process-wide registry.
//!
//! ```text
//! ┌────────────────┐   emit    ┌───────────┐  subscribe  ┌──────────────┐
//! │ AuthCoordinator├──────────>│           ├────────────>│ RelaySession │
//! └────────────────┘           │ EventBus  │             └──────────────┘
//! ┌────────────────┐   emit    │           │  subscribe  ┌──────────────┐
//! │ StateReconciler├──────────>│           ├────────────>│ log / display│
//! └────────────────┘           └───────────┘             └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(64);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Auth(AuthEvent::Disconnected)).ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Disconnected from Spotify");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal.
//! - **`RecvError::Closed`**: every sender was dropped. Treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed; emitters ignore that case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential lifecycle events
    Auth(AuthEvent),
    /// Playback observation events
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::PollFailed {
                retryable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::PollFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::ExternalInterruptionSuspected { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Auth(AuthEvent::Connected { .. } | AuthEvent::Disconnected) => {
                EventSeverity::Info
            }
            CoreEvent::Playback(PlaybackEvent::ResumeSuggested { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to the credential lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// Authorization code exchanged; a credential now exists.
    Connected {
        /// Access token expiry (Unix epoch milliseconds).
        expires_at: i64,
    },
    /// Credential removed by an explicit disconnect.
    Disconnected,
    /// Access token is being refreshed.
    TokenRefreshing,
    /// Token refresh completed successfully.
    TokenRefreshed {
        /// New access token expiry (Unix epoch milliseconds).
        expires_at: i64,
    },
    /// Authentication error occurred.
    AuthError {
        message: String,
        /// False when the user has to re-authorize.
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::Connected { .. } => "Connected to Spotify",
            AuthEvent::Disconnected => "Disconnected from Spotify",
            AuthEvent::TokenRefreshing => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Token refreshed successfully",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events derived from remote playback polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// Remote playback went from paused/absent to playing.
    Started { track_id: Option<String> },
    /// Remote playback went from playing to paused/absent.
    Stopped { track_id: Option<String> },
    /// A different track is now current.
    TrackChanged {
        from: Option<String>,
        to: Option<String>,
    },
    /// Playback paused shortly after a local control interaction.
    ExternalInterruptionSuspected { track_id: String },
    /// The interrupted track is still paused; resuming is advisable.
    ResumeSuggested { track_id: String },
    /// A poll tick failed after its retries were exhausted.
    PollFailed {
        /// Error kind, e.g. "network" or "rate_limited".
        kind: String,
        message: String,
        retryable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::TrackChanged { .. } => "Track changed",
            PlaybackEvent::ExternalInterruptionSuspected { .. } => {
                "Playback interrupted by the device"
            }
            PlaybackEvent::ResumeSuggested { .. } => "Resume suggested",
            PlaybackEvent::PollFailed { .. } => "Playback poll failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every clone publishes to the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus that buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(16);
/// let playback_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Playback(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refreshed(expires_at: i64) -> CoreEvent {
        CoreEvent::Auth(AuthEvent::TokenRefreshed { expires_at })
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_event() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(refreshed(42)).unwrap(), 2);

        assert_eq!(first.recv().await.unwrap(), refreshed(42));
        assert_eq!(second.recv().await.unwrap(), refreshed(42));
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(CoreEvent::Auth(AuthEvent::Disconnected)).is_err());
    }

    #[tokio::test]
    async fn test_filtered_stream_skips_other_events() {
        let bus = EventBus::new(16);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)));

        bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing)).unwrap();
        bus.emit(CoreEvent::Playback(PlaybackEvent::ResumeSuggested {
            track_id: "t1".to_string(),
        }))
        .unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.description(), "Resume suggested");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_reports_missed_events() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for i in 0..5 {
            bus.emit(refreshed(i)).unwrap();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(3)))));
        assert_eq!(stream.recv().await.unwrap(), refreshed(3));
    }

    #[test]
    fn test_severity() {
        let fatal = CoreEvent::Playback(PlaybackEvent::PollFailed {
            kind: "authentication".to_string(),
            message: "expired".to_string(),
            retryable: false,
        });
        let transient = CoreEvent::Playback(PlaybackEvent::PollFailed {
            kind: "network".to_string(),
            message: "reset".to_string(),
            retryable: true,
        });

        assert_eq!(fatal.severity(), EventSeverity::Error);
        assert_eq!(transient.severity(), EventSeverity::Warning);
        assert_eq!(refreshed(1).severity(), EventSeverity::Debug);
        assert_eq!(
            CoreEvent::Auth(AuthEvent::Disconnected).severity(),
            EventSeverity::Info
        );
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Playback(PlaybackEvent::TrackChanged {
            from: Some("a".to_string()),
            to: Some("b".to_string()),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Playback");
        assert_eq!(json["payload"]["event"], "TrackChanged");
        assert_eq!(json["payload"]["to"], "b");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
