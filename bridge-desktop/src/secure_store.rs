//! Secure Credential Storage using the OS keyring

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, error};

pub const DEFAULT_SERVICE_NAME: &str = "playback-relay";

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
///
/// Keyring entries hold strings only, so values are stored base64 encoded.
/// Keyring calls block, so each one runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct KeyringSecureStore {
    service_name: String,
}

enum KeyringOp {
    Set(String),
    Get,
    Delete,
}

enum KeyringOutcome {
    Done,
    Value(Option<String>),
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        match e {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                BridgeError::NotAvailable(format!("Keyring unavailable: {}", e))
            }
            other => BridgeError::OperationFailed(format!("Keyring error: {}", other)),
        }
    }

    async fn run(&self, key: &str, op: KeyringOp) -> Result<KeyringOutcome> {
        let service = self.service_name.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key).map_err(Self::map_keyring_error)?;
            match op {
                KeyringOp::Set(value) => entry
                    .set_password(&value)
                    .map(|_| KeyringOutcome::Done)
                    .map_err(Self::map_keyring_error),
                KeyringOp::Get => match entry.get_password() {
                    Ok(value) => Ok(KeyringOutcome::Value(Some(value))),
                    Err(keyring::Error::NoEntry) => Ok(KeyringOutcome::Value(None)),
                    Err(e) => Err(Self::map_keyring_error(e)),
                },
                KeyringOp::Delete => match entry.delete_credential() {
                    Ok(_) | Err(keyring::Error::NoEntry) => Ok(KeyringOutcome::Done),
                    Err(e) => Err(Self::map_keyring_error(e)),
                },
            }
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Keyring task failed: {}", e)))?
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.run(key, KeyringOp::Set(STANDARD.encode(value))).await?;
        debug!(key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let encoded = match self.run(key, KeyringOp::Get).await? {
            KeyringOutcome::Value(Some(encoded)) => encoded,
            _ => {
                debug!(key, "Secret not found in keyring");
                return Ok(None);
            }
        };

        let decoded = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            error!(key, error = %e, "Failed to decode secret");
            BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
        })?;
        Ok(Some(decoded))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.run(key, KeyringOp::Delete).await?;
        debug!(key, "Deleted secret from keyring");
        Ok(())
    }
}
