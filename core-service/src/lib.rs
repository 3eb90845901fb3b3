//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! secure storage, clock) into the relay core and owns the pieces that sit on
//! top of playback: the [`CommandDispatcher`] and the [`RelaySession`] timers.
//! Desktop and server hosts enable the `desktop-shims` feature (which depends
//! on `bridge-desktop`) and call [`CoreDependencies::desktop`].

pub mod dispatcher;
pub mod error;
pub mod intent;
pub mod session;

pub use dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome, OverlayState};
pub use error::{CoreError, Result};
pub use intent::Intent;
pub use session::{CredentialPresence, RelaySession, SessionSettings, CAMERA_BUTTON_ID};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    storage::{FileSystemAccess, SecureStore},
    time::{Clock, SystemClock},
};
use core_auth::{
    AuthCoordinator, CachedCredentialStore, CredentialStore, FileCredentialStore, OAuthClient,
    SecureCredentialStore, SpotifyOAuthConfig,
};
use core_playback::{PlaybackGateway, SharedReconciler, SpotifyPlaybackGateway, StateReconciler};
use core_runtime::config::{RelayConfig, StorageBackend};
use core_runtime::events::EventBus;
use tracing::info;

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub secure_store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        filesystem: Arc<dyn FileSystemAccess>,
        secure_store: Arc<dyn SecureStore>,
    ) -> Self {
        Self {
            http_client,
            filesystem,
            secure_store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Native bridges configured from `config`.
    #[cfg(feature = "desktop-shims")]
    pub fn desktop(config: &RelayConfig) -> Result<Self> {
        use bridge_desktop::{KeyringSecureStore, ReqwestHttpClient, TokioFileSystem};

        let http_client = ReqwestHttpClient::with_timeout(config.http_timeout)
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        let secure_store = match &config.storage {
            StorageBackend::Keyring { service } => KeyringSecureStore::with_service_name(service),
            StorageBackend::File { .. } => KeyringSecureStore::new(),
        };

        Ok(Self::new(
            Arc::new(http_client),
            Arc::new(TokioFileSystem::new()),
            Arc::new(secure_store),
        ))
    }
}

/// Primary façade exposed to host applications.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<RelayConfig>,
    auth: AuthCoordinator,
    gateway: Arc<dyn PlaybackGateway>,
    session: Arc<RelaySession>,
    event_bus: EventBus,
}

impl CoreService {
    /// Validate `config` and assemble the credential store, coordinator,
    /// gateway, reconciler and session. Timers are not started.
    pub fn bootstrap(config: RelayConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::default();
        let store = credential_store(&config, &deps);

        let oauth = OAuthClient::new(
            SpotifyOAuthConfig::new(
                config.client_id.clone(),
                config.client_secret.clone(),
                config.redirect_uri.clone(),
            ),
            Arc::clone(&deps.http_client),
        );
        let auth = AuthCoordinator::new(
            store,
            oauth,
            Arc::clone(&deps.clock),
            event_bus.clone(),
            config.refresh_margin,
        );

        let gateway: Arc<dyn PlaybackGateway> = Arc::new(
            SpotifyPlaybackGateway::new(
                Arc::clone(&deps.http_client),
                Arc::new(auth.clone()),
                Arc::clone(&deps.clock),
            )
            .with_timeout(config.http_timeout),
        );
        let reconciler = SharedReconciler::new(
            StateReconciler::new(Arc::clone(&deps.clock), &config.interruption),
            event_bus.clone(),
        );
        let session = RelaySession::new(
            Arc::new(auth.clone()),
            Arc::clone(&gateway),
            reconciler,
            event_bus.clone(),
            SessionSettings::from(&config),
        );

        info!(storage = ?config.storage, "Relay core initialized");

        Ok(Self {
            config: Arc::new(config),
            auth,
            gateway,
            session: Arc::new(session),
            event_bus,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthCoordinator {
        &self.auth
    }

    pub fn gateway(&self) -> &Arc<dyn PlaybackGateway> {
        &self.gateway
    }

    pub fn session(&self) -> &RelaySession {
        &self.session
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        self.session.dispatcher()
    }

    pub fn reconciler(&self) -> &SharedReconciler {
        self.session.reconciler()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

fn credential_store(config: &RelayConfig, deps: &CoreDependencies) -> Arc<dyn CredentialStore> {
    let backend: Arc<dyn CredentialStore> = match &config.storage {
        StorageBackend::File { path } => Arc::new(FileCredentialStore::new(
            Arc::clone(&deps.filesystem),
            path.clone(),
        )),
        StorageBackend::Keyring { .. } => {
            Arc::new(SecureCredentialStore::new(Arc::clone(&deps.secure_store)))
        }
    };
    Arc::new(CachedCredentialStore::new(
        backend,
        config.credential_cache_ttl,
    ))
}
