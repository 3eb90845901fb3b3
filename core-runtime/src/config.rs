//! # Relay Configuration
//!
//! Settings for one relay session: OAuth client credentials, where the
//! credential record lives, and the timings of the periodic activities.
//!
//! ## Overview
//!
//! `RelayConfig` is built either from the process environment
//! ([`RelayConfig::from_env`]) or programmatically through
//! [`RelayConfig::builder`]. Both paths end in [`RelayConfig::validate`], so an
//! invalid configuration fails at startup instead of on the first poll.
//!
//! ## Environment
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `SPOTIFY_CLIENT_ID` | OAuth client id | required |
//! | `SPOTIFY_CLIENT_SECRET` | OAuth client secret | required |
//! | `SPOTIFY_REDIRECT_URI` | OAuth redirect | `http://localhost:3000/callback` |
//! | `PORT` | Local HTTP port | `3000` |
//! | `RELAY_PUBLIC_URL` | Base URL used in `authUrl` | `http://localhost:{PORT}` |
//! | `RELAY_CREDENTIAL_BACKEND` | `file` or `keyring` | `file` |
//! | `RELAY_CREDENTIAL_PATH` | File backend location | `spotify_tokens.json` |
//! | `RELAY_POLL_INTERVAL_MS` | Playback poll interval | `5000` |
//! | `RELAY_AUTO_RESUME` | Resume after suspected interruptions | `true` |
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{RelayConfig, StorageBackend};
//! use std::time::Duration;
//!
//! let config = RelayConfig::builder()
//!     .client_credentials("client-id", "client-secret")
//!     .storage(StorageBackend::Keyring { service: "playback-relay".into() })
//!     .poll_interval(Duration::from_secs(3))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/callback";
pub const DEFAULT_CREDENTIAL_FILE: &str = "spotify_tokens.json";
pub const DEFAULT_KEYRING_SERVICE: &str = "playback-relay";

/// Where the credential record is persisted.
///
/// Exactly one backend is chosen per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// JSON file on disk.
    File { path: PathBuf },
    /// OS keyring entry under the given service name.
    Keyring { service: String },
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::File {
            path: PathBuf::from(DEFAULT_CREDENTIAL_FILE),
        }
    }
}

/// Bounded retry applied to each poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRetryConfig {
    /// Attempts per tick, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl Default for PollRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Interruption heuristic tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptionConfig {
    /// How recent a local control interaction must be for a pause to look external.
    pub window: Duration,
    /// How long a suspected interruption suppresses new suspicions.
    pub cooldown: Duration,
    /// Delay between a camera-button press and the follow-up playback check.
    pub resume_check_delay: Duration,
    /// Issue `play` when a resume is suggested.
    pub auto_resume: bool,
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            cooldown: Duration::from_secs(30),
            resume_check_delay: Duration::from_secs(2),
            auto_resume: true,
        }
    }
}

/// Complete configuration for one relay session.
#[derive(Clone)]
pub struct RelayConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Port the local HTTP surface listens on.
    pub port: u16,
    /// Externally reachable base URL of the local HTTP surface.
    pub public_base_url: String,
    pub storage: StorageBackend,
    pub poll_interval: Duration,
    pub auth_check_interval: Duration,
    /// Refresh once the token is this close to expiry.
    pub refresh_margin: Duration,
    /// TTL of the in-process credential cache.
    pub credential_cache_ttl: Duration,
    /// Default timeout for every outbound HTTP call.
    pub http_timeout: Duration,
    pub poll_retry: PollRetryConfig,
    pub interruption: InterruptionConfig,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("port", &self.port)
            .field("public_base_url", &self.public_base_url)
            .field("storage", &self.storage)
            .field("poll_interval", &self.poll_interval)
            .field("auth_check_interval", &self.auth_check_interval)
            .field("refresh_margin", &self.refresh_margin)
            .field("credential_cache_ttl", &self.credential_cache_ttl)
            .field("http_timeout", &self.http_timeout)
            .field("poll_retry", &self.poll_retry)
            .field("interruption", &self.interruption)
            .finish()
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let client_id = var("SPOTIFY_CLIENT_ID")
            .ok_or_else(|| Error::Config("SPOTIFY_CLIENT_ID must be set".to_string()))?;
        let client_secret = var("SPOTIFY_CLIENT_SECRET")
            .ok_or_else(|| Error::Config("SPOTIFY_CLIENT_SECRET must be set".to_string()))?;

        let mut builder = Self::builder().client_credentials(client_id, client_secret);

        if let Some(uri) = var("SPOTIFY_REDIRECT_URI") {
            builder = builder.redirect_uri(uri);
        }

        if let Some(port) = var("PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {}", port)))?;
            builder = builder.port(port);
        }

        if let Some(url) = var("RELAY_PUBLIC_URL") {
            builder = builder.public_base_url(url);
        }

        let backend = var("RELAY_CREDENTIAL_BACKEND").unwrap_or_else(|| "file".to_string());
        let storage = match backend.trim().to_ascii_lowercase().as_str() {
            "file" => StorageBackend::File {
                path: var("RELAY_CREDENTIAL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_FILE)),
            },
            "keyring" => StorageBackend::Keyring {
                service: DEFAULT_KEYRING_SERVICE.to_string(),
            },
            other => {
                return Err(Error::Config(format!(
                    "RELAY_CREDENTIAL_BACKEND must be 'file' or 'keyring', got '{}'",
                    other
                )))
            }
        };
        builder = builder.storage(storage);

        if let Some(ms) = var("RELAY_POLL_INTERVAL_MS") {
            let ms = ms.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("RELAY_POLL_INTERVAL_MS is not a number: {}", ms))
            })?;
            builder = builder.poll_interval(Duration::from_millis(ms));
        }

        if let Some(flag) = var("RELAY_AUTO_RESUME") {
            let enabled = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::Config(format!(
                        "RELAY_AUTO_RESUME must be a boolean, got '{}'",
                        other
                    )))
                }
            };
            builder = builder.auto_resume(enabled);
        }

        builder.build()
    }

    /// URL the UI should open to start authorization.
    pub fn auth_url(&self) -> String {
        format!("{}/auth", self.public_base_url.trim_end_matches('/'))
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("Client id cannot be empty".to_string()));
        }

        if self.client_secret.trim().is_empty() {
            return Err(Error::Config("Client secret cannot be empty".to_string()));
        }

        if !(self.redirect_uri.starts_with("http://") || self.redirect_uri.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "Redirect URI must be an absolute http(s) URL: {}",
                self.redirect_uri
            )));
        }

        match &self.storage {
            StorageBackend::File { path } if path.as_os_str().is_empty() => {
                return Err(Error::Config(
                    "Credential file path cannot be empty".to_string(),
                ));
            }
            StorageBackend::Keyring { service } if service.trim().is_empty() => {
                return Err(Error::Config(
                    "Keyring service name cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        for (name, value) in [
            ("Poll interval", self.poll_interval),
            ("Auth check interval", self.auth_check_interval),
            ("HTTP timeout", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.refresh_margin >= Duration::from_secs(24 * 60 * 60) {
            return Err(Error::Config(
                "Refresh margin must be shorter than a day".to_string(),
            ));
        }

        if self.poll_retry.max_attempts == 0 {
            return Err(Error::Config(
                "Poll retry attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    storage: Option<StorageBackend>,
    poll_interval: Option<Duration>,
    auth_check_interval: Option<Duration>,
    refresh_margin: Option<Duration>,
    credential_cache_ttl: Option<Duration>,
    http_timeout: Option<Duration>,
    poll_retry: Option<PollRetryConfig>,
    interruption: InterruptionConfig,
}

impl RelayConfigBuilder {
    pub fn client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    pub fn storage(mut self, storage: StorageBackend) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn auth_check_interval(mut self, interval: Duration) -> Self {
        self.auth_check_interval = Some(interval);
        self
    }

    pub fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = Some(margin);
        self
    }

    pub fn credential_cache_ttl(mut self, ttl: Duration) -> Self {
        self.credential_cache_ttl = Some(ttl);
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn poll_retry(mut self, retry: PollRetryConfig) -> Self {
        self.poll_retry = Some(retry);
        self
    }

    pub fn interruption(mut self, interruption: InterruptionConfig) -> Self {
        self.interruption = interruption;
        self
    }

    pub fn auto_resume(mut self, enabled: bool) -> Self {
        self.interruption.auto_resume = enabled;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<RelayConfig> {
        let client_id = self.client_id.ok_or_else(|| {
            Error::Config("Client id is required. Use .client_credentials() to set it.".to_string())
        })?;
        let client_secret = self.client_secret.ok_or_else(|| {
            Error::Config(
                "Client secret is required. Use .client_credentials() to set it.".to_string(),
            )
        })?;

        let port = self.port.unwrap_or(DEFAULT_PORT);

        let config = RelayConfig {
            client_id,
            client_secret,
            redirect_uri: self
                .redirect_uri
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            port,
            public_base_url: self
                .public_base_url
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            storage: self.storage.unwrap_or_default(),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_secs(5)),
            auth_check_interval: self.auth_check_interval.unwrap_or(Duration::from_secs(5)),
            refresh_margin: self.refresh_margin.unwrap_or(Duration::from_secs(10 * 60)),
            credential_cache_ttl: self
                .credential_cache_ttl
                .unwrap_or(Duration::from_millis(2000)),
            http_timeout: self.http_timeout.unwrap_or(Duration::from_secs(10)),
            poll_retry: self.poll_retry.unwrap_or_default(),
            interruption: self.interruption,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builder_defaults() {
        let config = RelayConfig::builder()
            .client_credentials("id", "secret")
            .build()
            .unwrap();

        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.port, 3000);
        assert_eq!(config.public_base_url, "http://localhost:3000");
        assert_eq!(config.auth_url(), "http://localhost:3000/auth");
        assert_eq!(config.storage, StorageBackend::default());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.refresh_margin, Duration::from_secs(600));
        assert_eq!(config.credential_cache_ttl, Duration::from_secs(2));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_retry.max_attempts, 2);
        assert!(config.interruption.auto_resume);
    }

    #[test]
    fn test_builder_requires_client_credentials() {
        let err = RelayConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("Client id is required"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let err = RelayConfig::builder()
            .client_credentials("id", "secret")
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Poll interval"));
    }

    #[test]
    fn test_validate_rejects_relative_redirect() {
        let err = RelayConfig::builder()
            .client_credentials("id", "secret")
            .redirect_uri("/callback")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Redirect URI"));
    }

    #[test]
    fn test_validate_rejects_zero_retry_attempts() {
        let result = RelayConfig::builder()
            .client_credentials("id", "secret")
            .poll_retry(PollRetryConfig {
                max_attempts: 0,
                base_delay: Duration::from_millis(10),
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup_reads_environment() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("SPOTIFY_CLIENT_ID", "abc"),
            ("SPOTIFY_CLIENT_SECRET", "xyz"),
            ("PORT", "8080"),
            ("RELAY_CREDENTIAL_BACKEND", "keyring"),
            ("RELAY_POLL_INTERVAL_MS", "2500"),
            ("RELAY_AUTO_RESUME", "off"),
        ]))
        .unwrap();

        assert_eq!(config.client_id, "abc");
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_base_url, "http://localhost:8080");
        assert_eq!(
            config.storage,
            StorageBackend::Keyring {
                service: DEFAULT_KEYRING_SERVICE.to_string()
            }
        );
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert!(!config.interruption.auto_resume);
    }

    #[test]
    fn test_from_lookup_requires_client_id() {
        let err =
            RelayConfig::from_lookup(lookup(&[("SPOTIFY_CLIENT_SECRET", "xyz")])).unwrap_err();
        assert!(err.to_string().contains("SPOTIFY_CLIENT_ID"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let base = [("SPOTIFY_CLIENT_ID", "a"), ("SPOTIFY_CLIENT_SECRET", "b")];

        let mut vars = base.to_vec();
        vars.push(("PORT", "eighty"));
        assert!(RelayConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push(("RELAY_CREDENTIAL_BACKEND", "sqlite"));
        assert!(RelayConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = RelayConfig::builder()
            .client_credentials("id", "super-secret")
            .build()
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
