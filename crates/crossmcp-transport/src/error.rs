//! Transport error types.

use thiserror::Error;

use crossmcp_protocol::McpError;

/// A specialized `Result` for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by transport implementations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection is closed; no further frames can move
    #[error("connection closed")]
    Closed,

    /// Failed to send a frame
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a frame
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame violated the transport's framing rules
    #[error("framing error: {0}")]
    Framing(String),

    /// The transport was configured with invalid parameters
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An underlying I/O error
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<TransportError> for McpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => McpError::ConnectionClosed,
            other => McpError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_maps_to_connection_closed() {
        let err: McpError = TransportError::Closed.into();
        assert!(matches!(err, McpError::ConnectionClosed));
        assert_eq!(err.code(), -32001);
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(TransportError::from(io), TransportError::Io(_)));
    }
}
