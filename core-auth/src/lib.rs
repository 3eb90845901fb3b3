//! # Authentication Module
//!
//! Credential lifecycle for a single Spotify session.
//!
//! ## Overview
//!
//! - [`CredentialStore`] persists the one [`CredentialRecord`] through a file or
//!   the OS keyring, behind a short-lived in-process cache
//! - [`OAuthClient`] talks to the Spotify accounts service
//! - [`AuthCoordinator`] returns a valid access token to any caller and runs
//!   at most one refresh at a time
//!
//! ## Features
//!
//! - Authorization-code grant with `state` validation
//! - Refresh ahead of expiry with a configurable margin
//! - Revoked refresh tokens clear the stored credential
//! - Auth lifecycle events on the session's event bus

pub mod coordinator;
pub mod credential_store;
pub mod error;
pub mod oauth;
pub mod types;

pub use coordinator::AuthCoordinator;
pub use credential_store::{
    CachedCredentialStore, CredentialStore, FileCredentialStore, SecureCredentialStore,
};
pub use error::{AuthError, Result, StorageError};
pub use oauth::{OAuthClient, SpotifyOAuthConfig, TokenGrant};
pub use types::{AuthState, CredentialRecord};
