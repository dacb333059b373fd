use thiserror::Error;

/// Errors produced by a [`crate::PlcTransport`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The link is not established; caller should reconnect before retrying.
    #[error("PLC connection lost: {0}")]
    ConnectionLost(String),

    /// A block read failed; the transport has been marked disconnected.
    #[error("PLC read failed: {0}")]
    ReadFailed(String),

    /// A block write failed; the transport has been marked disconnected.
    #[error("PLC write failed: {0}")]
    WriteFailed(String),
}

/// Convenience alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
