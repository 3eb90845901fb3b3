//! # Command Dispatcher
//!
//! Executes [`Intent`]s against the remote player and translates failures into
//! the short sentences shown on the display.
//!
//! The dispatcher never retries. A dispatch that calls the remote player
//! raises the overlay's loading flag for its duration. The flag is lowered by
//! a drop guard, so it is also cleared when the dispatch future is dropped.

use crate::intent::Intent;
use core_playback::{PlaybackError, PlaybackGateway, SharedReconciler};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// What the overlay should currently show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayState {
    pub visible: bool,
    pub loading: bool,
    /// User-facing message of the last failed dispatch.
    pub error: Option<String>,
}

/// A completed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub intent: Intent,
    pub message: String,
}

/// A failed dispatch. `Display` is the user-facing sentence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No track currently playing")]
    NothingPlaying,

    #[error("{}", user_message(.0))]
    Playback(#[from] PlaybackError),
}

impl DispatchError {
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Fixed sentence for each playback error kind.
pub fn user_message(error: &PlaybackError) -> &'static str {
    match error {
        PlaybackError::NoActiveDevice => {
            "No Spotify device found. Start playing music on your phone first."
        }
        PlaybackError::Authentication(_) => {
            "Spotify is not connected. Open settings to connect your account."
        }
        PlaybackError::Network(_) => {
            "Network connection failed. Please check your internet connection."
        }
        PlaybackError::RateLimited { .. } => {
            "Too many requests. Please wait a moment before trying again."
        }
        PlaybackError::Storage(_) => "Failed to save settings. Please try again.",
        PlaybackError::RemoteApi { .. } => {
            "Spotify player error. Check your connection and try again."
        }
    }
}

/// Lowers the loading flag when the last concurrent dispatch finishes.
struct LoadingGuard<'a> {
    dispatcher: &'a CommandDispatcher,
}

impl<'a> LoadingGuard<'a> {
    fn raise(dispatcher: &'a CommandDispatcher) -> Self {
        dispatcher.in_flight.fetch_add(1, Ordering::SeqCst);
        dispatcher.overlay.send_modify(|state| state.loading = true);
        Self { dispatcher }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.dispatcher.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.dispatcher
                .overlay
                .send_modify(|state| state.loading = false);
        }
    }
}

/// Voice command executor.
pub struct CommandDispatcher {
    gateway: Arc<dyn PlaybackGateway>,
    reconciler: SharedReconciler,
    overlay: watch::Sender<OverlayState>,
    in_flight: AtomicUsize,
}

impl CommandDispatcher {
    pub fn new(gateway: Arc<dyn PlaybackGateway>, reconciler: SharedReconciler) -> Self {
        let (overlay, _) = watch::channel(OverlayState::default());
        Self {
            gateway,
            reconciler,
            overlay,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn overlay(&self) -> OverlayState {
        self.overlay.borrow().clone()
    }

    pub fn subscribe_overlay(&self) -> watch::Receiver<OverlayState> {
        self.overlay.subscribe()
    }

    /// Execute one intent.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, intent: Intent) -> Result<DispatchOutcome, DispatchError> {
        let _loading = intent.is_remote().then(|| LoadingGuard::raise(self));

        match self.execute(intent).await {
            Ok(message) => {
                info!(reply = message, "Command completed");
                self.overlay.send_modify(|state| state.error = None);
                Ok(DispatchOutcome {
                    intent,
                    message: message.to_string(),
                })
            }
            Err(e) => {
                let message = e.user_message();
                warn!(error = ?e, "Command failed");
                self.overlay
                    .send_modify(|state| state.error = Some(message.clone()));
                Err(e)
            }
        }
    }

    /// Parse an utterance and dispatch it. `None` when nothing matched.
    pub async fn dispatch_utterance(
        &self,
        text: &str,
    ) -> Option<Result<DispatchOutcome, DispatchError>> {
        let intent = Intent::from_utterance(text)?;
        Some(self.dispatch(intent).await)
    }

    async fn execute(&self, intent: Intent) -> Result<&'static str, DispatchError> {
        match intent {
            Intent::ToggleOverlay => {
                let mut visible = false;
                self.overlay.send_modify(|state| {
                    state.visible = !state.visible;
                    visible = state.visible;
                });
                Ok(if visible {
                    "Showing Spotify"
                } else {
                    "Hiding Spotify"
                })
            }
            Intent::Hide => {
                self.overlay.send_modify(|state| state.visible = false);
                Ok("Hiding Spotify")
            }
            Intent::Next => {
                self.gateway.next().await?;
                Ok("Skipping to next track")
            }
            Intent::Previous => {
                self.gateway.previous().await?;
                Ok("Going to previous track")
            }
            Intent::Pause => {
                self.gateway.pause().await?;
                self.reconciler.note_user_pause();
                Ok("Music paused")
            }
            Intent::Play => {
                self.gateway.play().await?;
                Ok("Music playing")
            }
            Intent::Like => {
                let track = self
                    .reconciler
                    .current_track()
                    .ok_or(DispatchError::NothingPlaying)?;
                self.gateway.like_track(&track.id).await?;
                Ok("Track liked")
            }
        }
    }
}
