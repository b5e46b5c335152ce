//! The core transport trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportResult;

/// Connection state of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Not yet connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Ready to move frames
    Connected,
    /// Terminally failed
    Failed {
        /// Why the transport failed
        reason: String,
    },
}

/// A bidirectional frame pipe.
///
/// One frame is one serialized JSON-RPC message (possibly a batch). `send`
/// may suspend for backpressure. After `disconnect` (or a terminal failure),
/// `send` fails with [`crate::TransportError::Closed`] and `receive` yields
/// `Ok(None)`.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Transition to a usable state, allocating I/O resources.
    async fn connect(&self) -> TransportResult<()>;

    /// Close the underlying channel.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Transmit one frame.
    async fn send(&self, frame: Bytes) -> TransportResult<()>;

    /// Receive the next frame; `Ok(None)` means the peer closed cleanly.
    async fn receive(&self) -> TransportResult<Option<Bytes>>;

    /// Current connection state.
    async fn state(&self) -> TransportState;

    /// Endpoint identifier, if the transport has one.
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// True while the transport is in the `Connected` state.
    async fn is_connected(&self) -> bool {
        matches!(self.state().await, TransportState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_t: &dyn Transport) {}

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(TransportState::default(), TransportState::Disconnected);
    }
}
