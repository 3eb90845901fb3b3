//! # Playback Module
//!
//! Remote player access, timed sampling and state reconciliation.
//!
//! ## Overview
//!
//! This module handles:
//! - [`PlaybackGateway`]: Spotify Web API reads and transport commands
//! - [`PlaybackPoller`]: fixed-interval sampling with bounded retry
//! - [`StateReconciler`]: transitions and external-interruption detection
//!
//! Snapshots flow `gateway -> poller -> SharedReconciler`, and the reconciled
//! view is published on a `watch` channel for the UI and HTTP surfaces.

pub mod error;
pub mod gateway;
pub mod poller;
pub mod reconciler;
pub mod types;

pub use error::{PlaybackError, Result};
pub use gateway::{AccessTokenSource, PlaybackGateway, SpotifyPlaybackGateway};
pub use poller::PlaybackPoller;
pub use reconciler::{
    InterruptionSignal, ReconciledView, Reconciliation, SharedReconciler, SnapshotSink,
    StateReconciler, Transition,
};
pub use types::{Device, PlaybackSnapshot, TrackRef};
