//! # Playback Gateway
//!
//! Auth-aware client for the Spotify Web API player endpoints.
//!
//! Every call first obtains a token from an [`AccessTokenSource`], then sends
//! the request with bearer authorization. Responses are classified uniformly:
//!
//! | Response                         | Result                          |
//! |----------------------------------|---------------------------------|
//! | 204 on currently-playing         | `Ok(None)`                      |
//! | 401                              | [`PlaybackError::Authentication`] |
//! | 404 on a transport command       | [`PlaybackError::NoActiveDevice`] |
//! | 429                              | [`PlaybackError::RateLimited`]  |
//! | other non-2xx                    | [`PlaybackError::RemoteApi`]    |
//! | transport failure                | [`PlaybackError::Network`]      |
//!
//! Transport commands (`play`, `pause`, `next`, `previous`) list devices first
//! and fail with `NoActiveDevice` without sending the command when none is
//! active.

use crate::error::{PlaybackError, Result};
use crate::types::{
    ApiErrorBody, CurrentlyPlayingResponse, Device, DevicesResponse, PlaybackSnapshot,
};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::time::Clock;
use core_auth::{AuthCoordinator, AuthError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const SPOTIFY_API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Supplies bearer tokens to the gateway.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> std::result::Result<String, AuthError>;
}

#[async_trait]
impl AccessTokenSource for AuthCoordinator {
    async fn access_token(&self) -> std::result::Result<String, AuthError> {
        self.get_valid_access_token().await
    }
}

/// Remote player operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackGateway: Send + Sync {
    /// `Ok(None)` when nothing is playing (HTTP 204).
    async fn get_currently_playing(&self) -> Result<Option<PlaybackSnapshot>>;

    async fn list_devices(&self) -> Result<Vec<Device>>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn next(&self) -> Result<()>;

    async fn previous(&self) -> Result<()>;

    /// Save a track to the user's library.
    async fn like_track(&self, track_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum Transport {
    Play,
    Pause,
    Next,
    Previous,
}

impl Transport {
    fn method(self) -> HttpMethod {
        match self {
            Transport::Play | Transport::Pause => HttpMethod::Put,
            Transport::Next | Transport::Previous => HttpMethod::Post,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Transport::Play => "/me/player/play",
            Transport::Pause => "/me/player/pause",
            Transport::Next => "/me/player/next",
            Transport::Previous => "/me/player/previous",
        }
    }
}

/// [`PlaybackGateway`] over the Spotify Web API.
pub struct SpotifyPlaybackGateway {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn AccessTokenSource>,
    clock: Arc<dyn Clock>,
    base_url: String,
    timeout: Duration,
}

impl SpotifyPlaybackGateway {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        tokens: Arc<dyn AccessTokenSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            tokens,
            clock,
            base_url: SPOTIFY_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(&self, method: HttpMethod, path: &str) -> Result<HttpRequest> {
        let token = self.tokens.access_token().await?;
        Ok(
            HttpRequest::new(method, format!("{}{}", self.base_url, path))
                .bearer_token(token)
                .timeout(self.timeout),
        )
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        self.http_client.execute(request).await.map_err(|e| {
            warn!(method = method.as_str(), error = %e, "Spotify request failed");
            PlaybackError::from(e)
        })
    }

    #[instrument(skip(self))]
    async fn transport(&self, command: Transport) -> Result<()> {
        self.ensure_active_device().await?;

        let request = self.request(command.method(), command.path()).await?;
        let response = self.send(request).await?;
        classify(&response, true)?;

        debug!(?command, "Transport command accepted");
        Ok(())
    }

    async fn ensure_active_device(&self) -> Result<()> {
        let devices = self.list_devices().await?;
        if devices.iter().any(|device| device.is_active) {
            Ok(())
        } else {
            debug!(devices = devices.len(), "No active device");
            Err(PlaybackError::NoActiveDevice)
        }
    }
}

#[async_trait]
impl PlaybackGateway for SpotifyPlaybackGateway {
    #[instrument(skip(self))]
    async fn get_currently_playing(&self) -> Result<Option<PlaybackSnapshot>> {
        let request = self
            .request(HttpMethod::Get, "/me/player/currently-playing")
            .await?;
        let response = self.send(request).await?;

        if response.status == 204 {
            debug!("Nothing playing");
            return Ok(None);
        }
        classify(&response, false)?;

        let body: CurrentlyPlayingResponse = decode(&response)?;
        Ok(Some(
            body.into_snapshot(self.clock.unix_timestamp_millis()),
        ))
    }

    #[instrument(skip(self))]
    async fn list_devices(&self) -> Result<Vec<Device>> {
        let request = self.request(HttpMethod::Get, "/me/player/devices").await?;
        let response = self.send(request).await?;
        classify(&response, false)?;

        let body: DevicesResponse = decode(&response)?;
        Ok(body.devices)
    }

    async fn play(&self) -> Result<()> {
        self.transport(Transport::Play).await
    }

    async fn pause(&self) -> Result<()> {
        self.transport(Transport::Pause).await
    }

    async fn next(&self) -> Result<()> {
        self.transport(Transport::Next).await
    }

    async fn previous(&self) -> Result<()> {
        self.transport(Transport::Previous).await
    }

    #[instrument(skip(self))]
    async fn like_track(&self, track_id: &str) -> Result<()> {
        let request = self
            .request(HttpMethod::Put, "/me/tracks")
            .await?
            .json(&serde_json::json!({ "ids": [track_id] }))
            .map_err(|e| PlaybackError::RemoteApi {
                status: 0,
                message: e.to_string(),
            })?;
        let response = self.send(request).await?;
        classify(&response, false)?;

        debug!("Track saved to library");
        Ok(())
    }
}

/// Map a non-2xx response to its error kind.
fn classify(response: &HttpResponse, is_transport: bool) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }

    let status = response.status;
    let message = error_message(response);
    warn!(status = status, error = %message, "Spotify API returned an error");

    Err(match status {
        401 => PlaybackError::Authentication(message),
        404 if is_transport => PlaybackError::NoActiveDevice,
        429 => PlaybackError::RateLimited {
            retry_after: response
                .header("Retry-After")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        _ => PlaybackError::RemoteApi { status, message },
    })
}

fn error_message(response: &HttpResponse) -> String {
    response
        .json::<ApiErrorBody>()
        .map(|body| body.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .or_else(|| response.text().ok().filter(|text| !text.is_empty()))
        .unwrap_or_else(|| format!("HTTP {}", response.status))
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response.json().map_err(|e| PlaybackError::RemoteApi {
        status: response.status,
        message: format!("Unreadable response body: {}", e),
    })
}
