//! Route handlers. Each one delegates to the [`CoreService`](core_service::CoreService)
//! held in [`AppState`].

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use core_auth::AuthError;
use core_playback::TrackRef;
use core_service::{DispatchError, Intent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub auth_url: String,
    pub message: String,
}

/// Connection status for the settings panel.
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, HttpError> {
    let connected = state.auth().has_credential().await?;

    Ok(Json(StatusResponse {
        connected,
        auth_url: state.config().auth_url(),
        message: if connected {
            "Spotify is connected and ready to use"
        } else {
            "Click Connect to authenticate with Spotify"
        }
        .to_string(),
    }))
}

pub async fn disconnect(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, HttpError> {
    state.auth().disconnect().await?;
    Ok(Json(json!({
        "success": true,
        "message": "Successfully disconnected from Spotify",
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTrackResponse {
    pub track: Option<TrackRef>,
    pub is_playing: bool,
}

/// Reconciled playback state, or a live read before the first poll lands.
pub async fn current_track(State(state): State<AppState>) -> Response {
    match state.auth().has_credential().await {
        Ok(true) => {}
        Ok(false) => return not_authenticated(),
        Err(e) => return HttpError::from(e).into_response(),
    }

    let view = state.reconciler().view();
    if view.updated_at.is_some() {
        return Json(CurrentTrackResponse {
            track: view.current_track().cloned(),
            is_playing: view.is_playing(),
        })
        .into_response();
    }

    match state.gateway().get_currently_playing().await {
        Ok(snapshot) => {
            let is_playing = snapshot.as_ref().is_some_and(|s| s.is_playing);
            Json(CurrentTrackResponse {
                track: snapshot.and_then(|s| s.item),
                is_playing,
            })
            .into_response()
        }
        Err(core_playback::PlaybackError::Authentication(_)) => not_authenticated(),
        Err(e) => {
            error!(error = %e, "Failed to get current track");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to get current track", "track": null })),
            )
                .into_response()
        }
    }
}

fn not_authenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Not authenticated with Spotify", "track": null })),
    )
        .into_response()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "spotify-settings",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// 302 to the Spotify consent page.
pub async fn auth(State(state): State<AppState>) -> Result<Response, HttpError> {
    let url = state.auth().begin_authorization()?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

const CALLBACK_SUCCESS_PAGE: &str = r#"<html>
  <body style="font-family: Arial, sans-serif; text-align: center; padding: 50px;">
    <h2>Authentication Successful!</h2>
    <p>You can now close this window and return to your smart glasses.</p>
    <p>Try saying "Show Spotify" to see your music!</p>
  </body>
</html>"#;

/// OAuth redirect target.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    let (code, oauth_state) = match (query.error, query.code, query.state) {
        (Some(error), _, _) => {
            warn!(error = %error, "Authorization was denied");
            return callback_error(&error);
        }
        (None, Some(code), Some(oauth_state)) => (code, oauth_state),
        (None, None, _) => return callback_error("No code provided"),
        (None, Some(_), None) => return callback_error("No state provided"),
    };

    match state.auth().complete_authorization(&code, &oauth_state).await {
        Ok(_) => {
            info!("Successfully authenticated with Spotify");
            (StatusCode::OK, Html(CALLBACK_SUCCESS_PAGE.to_string()))
        }
        Err(AuthError::StateMismatch) => {
            callback_error("Authorization request expired or unknown")
        }
        Err(e) => {
            error!(error = %e, "Authentication callback failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("Authentication failed. Please try again.".to_string()),
            )
        }
    }
}

fn callback_error(reason: &str) -> (StatusCode, Html<String>) {
    (
        StatusCode::BAD_REQUEST,
        Html(format!("Authentication error: {}", escape_html(reason))),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct VoiceResponse {
    pub handled: bool,
    pub success: bool,
    pub intent: Option<Intent>,
    pub message: Option<String>,
}

/// Dispatch one transcription. Unrecognised speech is not an error.
pub async fn voice(
    State(state): State<AppState>,
    Json(req): Json<VoiceRequest>,
) -> Json<VoiceResponse> {
    let intent = Intent::from_utterance(&req.text);

    let response = match state.session().handle_utterance(&req.text).await {
        None => VoiceResponse {
            handled: false,
            success: false,
            intent: None,
            message: None,
        },
        Some(Ok(outcome)) => VoiceResponse {
            handled: true,
            success: true,
            intent: Some(outcome.intent),
            message: Some(outcome.message),
        },
        Some(Err(e)) => VoiceResponse {
            handled: true,
            success: false,
            intent,
            message: Some(DispatchError::user_message(&e)),
        },
    };

    Json(response)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonRequest {
    pub button_id: String,
}

pub async fn button(State(state): State<AppState>, Json(req): Json<ButtonRequest>) -> StatusCode {
    state.session().on_button_press(&req.button_id);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("access_denied"), "access_denied");
    }
}
