//! Credential Persistence
//!
//! One [`CredentialRecord`] per session, persisted through exactly one
//! durable backend chosen at construction:
//!
//! - [`FileCredentialStore`] writes a JSON file through [`FileSystemAccess`]
//! - [`SecureCredentialStore`] writes a keyring entry through [`SecureStore`]
//!
//! Either backend is wrapped in [`CachedCredentialStore`], which answers
//! near-simultaneous `load()` calls from memory for a short TTL.
//!
//! ## Stored format
//!
//! Records are written as
//! `{"access_token", "refresh_token", "expires_at", "obtained_at"}` with epoch
//! milliseconds. The older `{"expires_in", "obtained_at"}` shape is still
//! accepted on read and converted to an absolute expiry.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::credential_store::{CachedCredentialStore, CredentialStore, FileCredentialStore};
//! use bridge_desktop::TokioFileSystem;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), core_auth::StorageError> {
//! let file = FileCredentialStore::new(Arc::new(TokioFileSystem::new()), "spotify_tokens.json");
//! let store = CachedCredentialStore::new(Arc::new(file), Duration::from_secs(2));
//!
//! if let Some(record) = store.load().await? {
//!     println!("token expires at {}", record.expires_at);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::StorageError;
use crate::types::CredentialRecord;
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::storage::{FileSystemAccess, SecureStore};
use bytes::Bytes;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Keyring entry name used by [`SecureCredentialStore`].
pub const DEFAULT_SECRET_KEY: &str = "spotify_credentials";

/// Persistence contract for the session's single credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `Ok(None)` when no record exists.
    async fn load(&self) -> Result<Option<CredentialRecord>, StorageError>;

    /// Replace the stored record.
    async fn save(&self, record: &CredentialRecord) -> Result<(), StorageError>;

    /// Delete the stored record. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

// ============================================================================
// Serialized form
// ============================================================================

/// Shapes accepted on read.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCredential {
    Absolute {
        access_token: String,
        refresh_token: String,
        expires_at: i64,
        #[serde(default)]
        obtained_at: Option<i64>,
    },
    Relative {
        access_token: String,
        refresh_token: String,
        /// Seconds
        expires_in: i64,
        obtained_at: i64,
    },
}

/// Assumed token lifetime when a stored record lacks `obtained_at`.
const ASSUMED_LIFETIME_MS: i64 = 3_600_000;

fn decode_record(data: &[u8]) -> Result<CredentialRecord, String> {
    let stored: StoredCredential = serde_json::from_slice(data).map_err(|e| e.to_string())?;

    let record = match stored {
        StoredCredential::Absolute {
            access_token,
            refresh_token,
            expires_at,
            obtained_at,
        } => {
            let obtained_at = match obtained_at {
                Some(obtained_at) => obtained_at,
                None => expires_at
                    .checked_sub(ASSUMED_LIFETIME_MS)
                    .ok_or_else(|| format!("expires_at out of range: {}", expires_at))?,
            };
            CredentialRecord {
                access_token,
                refresh_token,
                expires_at,
                obtained_at,
            }
        }
        StoredCredential::Relative {
            access_token,
            refresh_token,
            expires_in,
            obtained_at,
        } => {
            let expires_at = expires_in
                .checked_mul(1000)
                .and_then(|lifetime_ms| obtained_at.checked_add(lifetime_ms))
                .ok_or_else(|| format!("expires_in out of range: {}", expires_in))?;
            CredentialRecord {
                access_token,
                refresh_token,
                expires_at,
                obtained_at,
            }
        }
    };

    if !record.is_well_formed() {
        return Err("record is missing a token or expires before it was obtained".to_string());
    }

    Ok(record)
}

fn encode_record(record: &CredentialRecord) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn unavailable(e: BridgeError) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

// ============================================================================
// File backend
// ============================================================================

/// JSON file backend.
#[derive(Clone)]
pub struct FileCredentialStore {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(fs: Arc<dyn FileSystemAccess>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StorageError> {
        if !self.fs.exists(&self.path).await.map_err(unavailable)? {
            debug!(file = %self.file_name(), "No credential file");
            return Ok(None);
        }

        let data = match self.fs.read_file(&self.path).await {
            Ok(data) => data,
            // Deleted between the existence check and the read
            Err(BridgeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(e) => {
                warn!(file = %self.file_name(), error = %e, "Failed to read credential file");
                return Err(unavailable(e));
            }
        };

        match decode_record(&data) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                warn!(
                    file = %self.file_name(),
                    error = %reason,
                    "Credential file is corrupted, removing it"
                );
                if let Err(delete_err) = self.fs.delete_file(&self.path).await {
                    warn!(error = %delete_err, "Failed to delete corrupted credential file");
                }
                Err(StorageError::Corrupted(reason))
            }
        }
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), StorageError> {
        let json = encode_record(record)?;
        self.fs
            .write_file(&self.path, Bytes::from(json))
            .await
            .map_err(|e| {
                warn!(file = %self.file_name(), error = %e, "Failed to write credential file");
                unavailable(e)
            })?;

        debug!(file = %self.file_name(), expires_at = record.expires_at, "Credential saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        if !self.fs.exists(&self.path).await.map_err(unavailable)? {
            return Ok(());
        }

        match self.fs.delete_file(&self.path).await {
            Ok(()) => {}
            Err(BridgeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(unavailable(e)),
        }

        info!(file = %self.file_name(), "Credential file removed");
        Ok(())
    }
}

// ============================================================================
// Keyring backend
// ============================================================================

/// OS keyring backend.
#[derive(Clone)]
pub struct SecureCredentialStore {
    secure_store: Arc<dyn SecureStore>,
    key: String,
}

impl SecureCredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self::with_key(secure_store, DEFAULT_SECRET_KEY)
    }

    pub fn with_key(secure_store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        Self {
            secure_store,
            key: key.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for SecureCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StorageError> {
        let Some(data) = self
            .secure_store
            .get_secret(&self.key)
            .await
            .map_err(unavailable)?
        else {
            debug!(key = %self.key, "No credential in secure store");
            return Ok(None);
        };

        match decode_record(&data) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                warn!(
                    key = %self.key,
                    error = %reason,
                    "Stored credential is corrupted, removing it"
                );
                if let Err(delete_err) = self.secure_store.delete_secret(&self.key).await {
                    warn!(error = %delete_err, "Failed to delete corrupted credential");
                }
                Err(StorageError::Corrupted(reason))
            }
        }
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), StorageError> {
        let json = encode_record(record)?;
        self.secure_store
            .set_secret(&self.key, &json)
            .await
            .map_err(unavailable)?;

        debug!(key = %self.key, expires_at = record.expires_at, "Credential saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.secure_store
            .delete_secret(&self.key)
            .await
            .map_err(unavailable)?;
        info!(key = %self.key, "Credential removed from secure store");
        Ok(())
    }
}

// ============================================================================
// TTL cache
// ============================================================================

struct CacheEntry {
    value: Option<CredentialRecord>,
    loaded_at: Instant,
}

/// Read-through cache in front of a durable backend.
///
/// `load()` results, including "absent", are reused for `ttl`. `save()` and
/// `clear()` replace the cached value once the durable write succeeds; a failed
/// write drops the cache so the next `load()` reads the medium again.
pub struct CachedCredentialStore {
    inner: Arc<dyn CredentialStore>,
    ttl: Duration,
    cache: Mutex<Option<CacheEntry>>,
}

impl CachedCredentialStore {
    pub fn new(inner: Arc<dyn CredentialStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Forget the cached value.
    pub fn invalidate(&self) {
        self.set_cache(None);
    }

    fn cached(&self) -> Option<Option<CredentialRecord>> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache
            .as_ref()
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    fn set_cache(&self, entry: Option<CacheEntry>) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        *cache = entry;
    }

    fn store_value(&self, value: Option<CredentialRecord>) {
        self.set_cache(Some(CacheEntry {
            value,
            loaded_at: Instant::now(),
        }));
    }
}

#[async_trait]
impl CredentialStore for CachedCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StorageError> {
        if let Some(hit) = self.cached() {
            return Ok(hit);
        }

        let value = self.inner.load().await?;
        self.store_value(value.clone());
        Ok(value)
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), StorageError> {
        match self.inner.save(record).await {
            Ok(()) => {
                self.store_value(Some(record.clone()));
                Ok(())
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match self.inner.clear().await {
            Ok(()) => {
                self.store_value(None);
                Ok(())
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }
}
