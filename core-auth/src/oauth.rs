//! Spotify OAuth 2.0 Client
//!
//! Implements the authorization-code grant (RFC 6749 §4.1) against the Spotify
//! accounts service. Both token requests authenticate the application with
//! HTTP Basic `client_id:client_secret`.
//!
//! # Overview
//!
//! - Building the authorization URL with a random `state`
//! - Exchanging an authorization code for a token pair
//! - Refreshing the access token with the stored refresh token
//!
//! Token values, codes and client secrets are never logged.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::{OAuthClient, SpotifyOAuthConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = SpotifyOAuthConfig::new(
//!     "client-id",
//!     "client-secret",
//!     "http://localhost:3000/callback",
//! );
//!
//! let client = OAuthClient::new(config, http_client);
//! let (auth_url, state) = client.build_auth_url()?;
//! // Redirect the user to auth_url, keep `state` for the callback...
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Scopes needed to read playback, control transport and save tracks.
pub const SPOTIFY_SCOPES: &[&str] = &[
    "user-read-currently-playing",
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-library-modify",
];

/// OAuth application registration.
#[derive(Clone)]
pub struct SpotifyOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
}

impl SpotifyOAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: SPOTIFY_SCOPES.iter().map(|s| s.to_string()).collect(),
            auth_url: SPOTIFY_AUTH_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
        }
    }

    /// Point the token endpoint elsewhere (used by tests and proxies).
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    fn basic_credentials(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
    }
}

impl fmt::Debug for SpotifyOAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// Result of a successful token request, before it becomes a stored record.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent when the endpoint keeps the previous refresh token valid.
    pub refresh_token: Option<String>,
    /// Seconds
    pub expires_in: i64,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Generate a URL-safe random `state` value.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Token endpoint client.
pub struct OAuthClient {
    config: SpotifyOAuthConfig,
    http_client: Arc<dyn HttpClient>,
}

impl OAuthClient {
    pub fn new(config: SpotifyOAuthConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &SpotifyOAuthConfig {
        &self.config
    }

    /// Build the authorization URL the user has to visit.
    ///
    /// Returns the URL and the `state` embedded in it; the callback must
    /// present the same `state`.
    #[instrument(skip(self))]
    pub fn build_auth_url(&self) -> Result<(String, String)> {
        let state = generate_state();

        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::Config(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", &state);

        debug!("Built authorization URL");

        Ok((url.to_string(), state))
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// # Errors
    ///
    /// - [`AuthError::GrantRejected`] if the endpoint refuses the code (4xx)
    /// - [`AuthError::ExchangeFailed`] on transport failure or 5xx
    /// - [`AuthError::InvalidTokenResponse`] if the body lacks a refresh token
    ///   or carries an out-of-range `expires_in`
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let body = encode_form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
        ])?;

        debug!("Exchanging authorization code for tokens");

        let response = self
            .http_client
            .execute(self.token_request(body))
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        if !response.is_success() {
            let status = response.status;
            let error_body = error_text(&response);

            warn!(
                status = status,
                error = %error_body,
                "Token exchange failed while exchanging authorization code"
            );

            return Err(if response.is_client_error() {
                AuthError::GrantRejected {
                    status,
                    reason: error_body,
                }
            } else {
                AuthError::ExchangeFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, error_body
                ))
            });
        }

        let grant = parse_token_response(&response)?;
        if grant.refresh_token.is_none() {
            return Err(AuthError::InvalidTokenResponse(
                "authorization code exchange returned no refresh token".to_string(),
            ));
        }

        info!(expires_in = grant.expires_in, "Exchanged code for tokens");
        Ok(grant)
    }

    /// Obtain a new access token.
    ///
    /// 5xx responses are retried up to three attempts with 100ms, 200ms
    /// backoff. A 4xx means the refresh token is no longer usable and is
    /// returned immediately as [`AuthError::GrantRejected`].
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let body = encode_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])?;

        debug!("Refreshing access token");

        let policy = RetryPolicy::default();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .http_client
                .execute(self.token_request(body.clone()))
                .await
                .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))?;

            if response.is_success() {
                let grant = parse_token_response(&response)?;
                info!(expires_in = grant.expires_in, "Refreshed access token");
                return Ok(grant);
            }

            let status = response.status;

            if response.is_client_error() {
                let error_body = error_text(&response);

                warn!(
                    status = status,
                    error = %error_body,
                    "Token refresh rejected"
                );

                return Err(AuthError::GrantRejected {
                    status,
                    reason: error_body,
                });
            }

            if attempts >= policy.max_attempts {
                let error_body = error_text(&response);

                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token refresh failed after {} attempts. Last error: {} - {}",
                    attempts, status, error_body
                )));
            }

            let delay = policy.delay_for_attempt(attempts);
            warn!(
                status = status,
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            sleep(delay).await;
        }
    }

    fn token_request(&self, body: Bytes) -> HttpRequest {
        HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
            .basic_auth(self.config.basic_credentials())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
    }
}

fn encode_form(params: &[(&str, &str)]) -> Result<Bytes> {
    serde_urlencoded::to_string(params)
        .map(Bytes::from)
        .map_err(|e| AuthError::Config(format!("Failed to encode token request: {}", e)))
}

fn error_text(response: &HttpResponse) -> String {
    response
        .text()
        .unwrap_or_else(|_| "Unable to read error response".to_string())
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenGrant> {
    let token_response: TokenResponse = response
        .json()
        .map_err(|e| AuthError::InvalidTokenResponse(e.to_string()))?;

    if !(1..=MAX_TOKEN_LIFETIME_SECS).contains(&token_response.expires_in) {
        return Err(AuthError::InvalidTokenResponse(format!(
            "expires_in out of range: {}",
            token_response.expires_in
        )));
    }

    Ok(TokenGrant {
        access_token: token_response.access_token,
        refresh_token: token_response.refresh_token,
        expires_in: token_response.expires_in,
    })
}

/// Token endpoint response body.
#[derive(Debug, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// Longest token lifetime accepted from the token endpoint (one year).
const MAX_TOKEN_LIFETIME_SECS: i64 = 366 * 24 * 3600;

fn default_expires_in() -> i64 {
    3600
}
