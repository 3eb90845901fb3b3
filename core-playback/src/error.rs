//! # Playback Error Types
//!
//! Error taxonomy for remote playback reads and transport commands.

use bridge_traits::error::BridgeError;
use core_auth::{AuthError, StorageError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the remote player.
///
/// `Clone` so a poll failure can be both logged and forwarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// No credential, or the credential was rejected. Requires re-authorization.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Timeout, DNS failure, connection reset.
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 429.
    #[error("Rate limited by the remote API")]
    RateLimited {
        /// Value of the `Retry-After` header, when present.
        retry_after: Option<Duration>,
    },

    /// No device is currently active. Requires the user to start playback
    /// somewhere.
    #[error("No active playback device")]
    NoActiveDevice,

    /// The credential medium could not be read or written.
    #[error("Credential storage error: {0}")]
    Storage(String),

    /// Any other non-2xx response, or an unreadable body.
    #[error("Remote API error ({status}): {message}")]
    RemoteApi { status: u16, message: String },
}

impl PlaybackError {
    /// Returns `true` if the poller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlaybackError::Network(_)
                | PlaybackError::RateLimited { .. }
                | PlaybackError::Storage(_)
                | PlaybackError::RemoteApi { .. }
        )
    }

    /// Stable identifier used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackError::Authentication(_) => "authentication",
            PlaybackError::Network(_) => "network",
            PlaybackError::RateLimited { .. } => "rate_limited",
            PlaybackError::NoActiveDevice => "no_active_device",
            PlaybackError::Storage(_) => "storage",
            PlaybackError::RemoteApi { .. } => "remote_api",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlaybackError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<AuthError> for PlaybackError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Storage(
                StorageError::Unavailable(msg) | StorageError::Serialization(msg),
            ) => PlaybackError::Storage(msg),
            // A corrupted record was deleted; the user has to connect again.
            other => PlaybackError::Authentication(other.to_string()),
        }
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(error: BridgeError) -> Self {
        PlaybackError::Network(error.to_string())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(PlaybackError::Network("reset".into()).is_retryable());
        assert!(PlaybackError::RateLimited { retry_after: None }.is_retryable());
        assert!(PlaybackError::RemoteApi {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());

        assert!(!PlaybackError::NoActiveDevice.is_retryable());
        assert!(!PlaybackError::Authentication("expired".into()).is_retryable());
    }

    #[test]
    fn test_auth_error_mapping() {
        assert_eq!(
            PlaybackError::from(AuthError::NotAuthenticated).kind(),
            "authentication"
        );
        assert_eq!(
            PlaybackError::from(AuthError::Storage(StorageError::Unavailable(
                "locked".into()
            ))),
            PlaybackError::Storage("locked".into())
        );
        assert_eq!(
            PlaybackError::from(AuthError::Storage(StorageError::Corrupted("bad".into()))).kind(),
            "authentication"
        );
    }

    #[test]
    fn test_retry_after() {
        let err = PlaybackError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(PlaybackError::NoActiveDevice.retry_after(), None);
    }
}
