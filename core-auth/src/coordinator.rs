//! # Auth Coordinator
//!
//! Hands a valid access token to any caller and owns the credential state
//! machine.
//!
//! ## Overview
//!
//! The poller and the command dispatcher both ask for a token, often within
//! the same few milliseconds. When the stored token is inside the refresh
//! margin, the first caller starts a refresh and stores it as a shared future;
//! every caller arriving before it settles awaits that same future, so the
//! token endpoint sees one request per expiry.
//!
//! ```text
//!  caller A ─┐                      ┌─> token endpoint (1 request)
//!  caller B ─┼─> in_flight: Shared ─┤
//!  caller C ─┘                      └─> save(record) ─> Ok(token) to A, B, C
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthCoordinator, CredentialStore, OAuthClient};
//! use bridge_traits::time::SystemClock;
//! use core_runtime::events::EventBus;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(store: Arc<dyn CredentialStore>, oauth: OAuthClient) -> core_auth::Result<()> {
//! let coordinator = AuthCoordinator::new(
//!     store,
//!     oauth,
//!     Arc::new(SystemClock),
//!     EventBus::default(),
//!     Duration::from_secs(600),
//! );
//!
//! let token = coordinator.get_valid_access_token().await?;
//! # Ok(())
//! # }
//! ```

use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::oauth::OAuthClient;
use crate::types::{AuthState, CredentialRecord};
use bridge_traits::time::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, instrument, warn};

/// Authorization attempts remembered for callback validation.
const MAX_PENDING_AUTHORIZATIONS: usize = 8;

type RefreshFuture = Shared<BoxFuture<'static, Result<CredentialRecord>>>;

/// A pending refresh tagged with its sequence number.
type InFlight = (u64, RefreshFuture);

/// Single-credential token lifecycle manager.
///
/// Cheap to clone; clones share the in-flight refresh and state.
#[derive(Clone)]
pub struct AuthCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    oauth: OAuthClient,
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    event_bus: EventBus,
    state: watch::Sender<AuthState>,
    pending_states: Mutex<VecDeque<String>>,
    in_flight: Mutex<Option<InFlight>>,
    refresh_seq: AtomicU64,
    /// Bumped whenever the stored credential is replaced or removed outside
    /// a refresh. A refresh started under an older generation must not write.
    generation: AtomicU64,
    /// Serializes generation checks with the store writes that follow them.
    writes: AsyncMutex<()>,
}

impl AuthCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        oauth: OAuthClient,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        refresh_margin: Duration,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);

        Self {
            inner: Arc::new(Inner {
                store,
                oauth,
                clock,
                refresh_margin,
                event_bus,
                state,
                pending_states: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(None),
                refresh_seq: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                writes: AsyncMutex::new(()),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AuthState {
        *self.inner.state.borrow()
    }

    /// Observe lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Return an access token that is valid for at least the refresh margin.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] when no credential is stored
    /// - [`AuthError::GrantRejected`] when the refresh token was revoked; the
    ///   stored record is deleted
    /// - [`AuthError::TokenRefreshFailed`] on a transient refresh failure; the
    ///   stored record is kept so a later call retries
    /// - [`AuthError::Storage`] when the medium cannot be read or written
    #[instrument(skip(self))]
    pub async fn get_valid_access_token(&self) -> Result<String> {
        let Some(record) = self.inner.store.load().await? else {
            debug!("No stored credential");
            self.inner.set_state(AuthState::Unauthenticated);
            return Err(AuthError::NotAuthenticated);
        };

        let now = self.inner.clock.unix_timestamp_millis();
        if !record.needs_refresh(now, self.inner.refresh_margin) {
            self.inner.mark_authenticated();
            return Ok(record.access_token);
        }

        info!(
            remaining_ms = record.remaining_ms(now),
            "Token expired or expiring soon, refreshing"
        );

        let refreshed = self.refresh_once().await?;
        Ok(refreshed.access_token)
    }

    /// Join the in-flight refresh, or start one.
    fn refresh_once(&self) -> RefreshFuture {
        let mut slot = self.inner.lock_in_flight();

        if let Some((_, pending)) = slot.as_ref() {
            debug!("Joining in-flight token refresh");
            return pending.clone();
        }

        let seq = self.inner.refresh_seq.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let refresh = async move {
            let result = inner.perform_refresh().await;
            let mut slot = inner.lock_in_flight();
            if slot.as_ref().is_some_and(|(current, _)| *current == seq) {
                slot.take();
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some((seq, refresh.clone()));
        refresh
    }

    /// Exchange an authorization code and persist the resulting credential.
    ///
    /// This is the only transition out of `Unauthenticated`.
    #[instrument(skip(self, code))]
    pub async fn exchange_code_for_tokens(&self, code: &str) -> Result<CredentialRecord> {
        let grant = match self.inner.oauth.exchange_code(code).await {
            Ok(grant) => grant,
            Err(e) => {
                self.inner.report_error(&e);
                return Err(e);
            }
        };

        let refresh_token = grant.refresh_token.ok_or_else(|| {
            AuthError::InvalidTokenResponse("missing refresh token".to_string())
        })?;
        let record = CredentialRecord::issued(
            grant.access_token,
            refresh_token,
            grant.expires_in,
            self.inner.clock.unix_timestamp_millis(),
        );

        {
            let _writes = self.inner.writes.lock().await;
            self.inner.retire_credential();
            if let Err(e) = self.inner.store.save(&record).await {
                let e = AuthError::from(e);
                self.inner.report_error(&e);
                return Err(e);
            }
        }

        self.inner.set_state(AuthState::Authenticated);
        self.inner.emit(AuthEvent::Connected {
            expires_at: record.expires_at,
        });
        info!(expires_at = record.expires_at, "Connected to Spotify");

        Ok(record)
    }

    /// Build an authorization URL and remember its `state` for the callback.
    pub fn begin_authorization(&self) -> Result<String> {
        let (url, state) = self.inner.oauth.build_auth_url()?;

        let mut pending = self
            .inner
            .pending_states
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if pending.len() >= MAX_PENDING_AUTHORIZATIONS {
            pending.pop_front();
        }
        pending.push_back(state);

        Ok(url)
    }

    /// Validate the callback `state`, then exchange the code.
    #[instrument(skip(self, code, state))]
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> Result<CredentialRecord> {
        let known = {
            let mut pending = self
                .inner
                .pending_states
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            match pending.iter().position(|s| s == state) {
                Some(index) => {
                    pending.remove(index);
                    true
                }
                None => false,
            }
        };

        if !known {
            warn!("OAuth callback carried an unknown state");
            return Err(AuthError::StateMismatch);
        }

        self.exchange_code_for_tokens(code).await
    }

    /// Delete the credential and return to `Unauthenticated`.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        {
            let _writes = self.inner.writes.lock().await;
            self.inner.retire_credential();
            self.inner.store.clear().await?;
        }
        self.inner.set_state(AuthState::Unauthenticated);
        self.inner.emit(AuthEvent::Disconnected);
        info!("Disconnected from Spotify");
        Ok(())
    }

    /// Whether a credential is stored, without refreshing it.
    pub async fn has_credential(&self) -> Result<bool> {
        let present = self.inner.store.load().await?.is_some();
        if present {
            self.inner.mark_authenticated();
        } else {
            self.inner.set_state(AuthState::Unauthenticated);
        }
        Ok(present)
    }
}

impl Inner {
    async fn perform_refresh(&self) -> Result<CredentialRecord> {
        let generation = self.generation.load(Ordering::SeqCst);

        // The caller may have read the record just before a previous refresh
        // saved its replacement.
        let Some(current) = self.store.load().await? else {
            self.set_state(AuthState::Unauthenticated);
            return Err(AuthError::NotAuthenticated);
        };
        let now = self.clock.unix_timestamp_millis();
        if !current.needs_refresh(now, self.refresh_margin) {
            self.mark_authenticated();
            return Ok(current);
        }

        self.set_state(AuthState::RefreshPending);
        self.emit(AuthEvent::TokenRefreshing);

        let refreshed = self.oauth.refresh(&current.refresh_token).await;

        let writes = self.writes.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            drop(writes);
            return self.superseded_refresh().await;
        }

        let grant = match refreshed {
            Ok(grant) => grant,
            Err(e) => {
                error!(error = %e, "Token refresh failed");
                if matches!(e, AuthError::GrantRejected { .. }) {
                    if let Err(clear_err) = self.store.clear().await {
                        warn!(error = %clear_err, "Failed to remove rejected credential");
                    }
                }
                self.set_state(AuthState::Unauthenticated);
                self.report_error(&e);
                return Err(e);
            }
        };

        let refreshed = current.refreshed(
            grant.access_token,
            grant.refresh_token,
            grant.expires_in,
            self.clock.unix_timestamp_millis(),
        );

        if let Err(e) = self.store.save(&refreshed).await {
            // The previous record is still stored and still usable
            self.set_state(AuthState::Authenticated);
            let e = AuthError::from(e);
            self.report_error(&e);
            return Err(e);
        }

        self.set_state(AuthState::Authenticated);
        self.emit(AuthEvent::TokenRefreshed {
            expires_at: refreshed.expires_at,
        });
        info!(expires_at = refreshed.expires_at, "Token refreshed successfully");

        Ok(refreshed)
    }

    /// The credential was removed or replaced while the token endpoint was
    /// answering. The grant is discarded and callers get whatever is stored now.
    async fn superseded_refresh(&self) -> Result<CredentialRecord> {
        debug!("Credential changed during refresh; discarding refreshed token");
        match self.store.load().await? {
            Some(record) => {
                self.set_state(AuthState::Authenticated);
                Ok(record)
            }
            None => {
                self.set_state(AuthState::Unauthenticated);
                Err(AuthError::NotAuthenticated)
            }
        }
    }

    /// Invalidate any refresh started against the current credential.
    /// Callers hold `writes`.
    fn retire_credential(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.lock_in_flight().take();
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: AuthState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "Auth state changed");
            *state = next;
            true
        });
    }

    /// `RefreshPending` is left only by the refresh itself.
    fn mark_authenticated(&self) {
        if !self.state.borrow().is_authenticated() {
            self.set_state(AuthState::Authenticated);
        }
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.event_bus.emit(CoreEvent::Auth(event));
    }

    fn report_error(&self, error: &AuthError) {
        self.emit(AuthEvent::AuthError {
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        });
    }
}
