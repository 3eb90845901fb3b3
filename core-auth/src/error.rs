use thiserror::Error;

/// Failures of the durable credential medium.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored credential is corrupted: {0}")]
    Corrupted(String),

    #[error("Credential serialization failed: {0}")]
    Serialization(String),
}

/// Authentication taxonomy.
///
/// `Clone` so one refresh outcome can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The token endpoint refused the grant (revoked or unknown refresh token,
    /// bad authorization code). Only re-authorization helps.
    #[error("Token endpoint rejected the grant ({status}): {reason}")]
    GrantRejected { status: u16, reason: String },

    /// Transient refresh failure: network, timeout or 5xx after retries.
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("OAuth state does not match any pending authorization")]
    StateMismatch,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("OAuth configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if retrying later may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::TokenRefreshFailed(_) | AuthError::Storage(StorageError::Unavailable(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
