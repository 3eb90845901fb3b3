use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Transport-level failure: DNS, connection refused/reset, TLS.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns true for failures that happened before a response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Network(_) | BridgeError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
