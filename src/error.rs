//! Axum-specific error types and mappings.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use core_auth::AuthError;
use core_playback::PlaybackError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    /// No usable Spotify credential.
    #[error("{0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Spotify answered with an error.
    #[error("{0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Upstream(_) => StatusCode::BAD_GATEWAY,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthenticated | AuthError::GrantRejected { .. } => {
                HttpError::Unauthorized("Not authenticated with Spotify".to_string())
            }
            AuthError::StateMismatch => HttpError::BadRequest(err.to_string()),
            other => HttpError::Internal(other.to_string()),
        }
    }
}

impl From<PlaybackError> for HttpError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::Authentication(_) => {
                HttpError::Unauthorized("Not authenticated with Spotify".to_string())
            }
            PlaybackError::Storage(msg) => HttpError::Internal(msg),
            other => HttpError::Upstream(other.to_string()),
        }
    }
}
