use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Connect or read deadline elapsed at the transport boundary.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// DNS resolution or TCP/TLS connection establishment failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` when the failure happened before any response was received
    /// and a later attempt may succeed.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_) | BridgeError::ConnectionFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
