//! In-memory transport: a channel-backed duplex pair.
//!
//! [`InMemoryTransport::pair`] returns two connected transports; frames sent
//! on one arrive on the other in order. Used by the test suites and for
//! embedding a server in the same process as its client.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::trace;

use crate::error::{TransportError, TransportResult};
use crate::traits::{Transport, TransportState};

/// Frames buffered per direction before senders suspend.
const CHANNEL_DEPTH: usize = 64;

/// One end of an in-process duplex connection.
pub struct InMemoryTransport {
    state: Arc<StdMutex<TransportState>>,
    tx: mpsc::Sender<Bytes>,
    rx: Arc<TokioMutex<mpsc::Receiver<Bytes>>>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl InMemoryTransport {
    /// Create a connected pair of transports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
        (Self::from_halves(a_tx, a_rx), Self::from_halves(b_tx, b_rx))
    }

    fn from_halves(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            tx,
            rx: Arc::new(TokioMutex::new(rx)),
        }
    }

    fn set_state(&self, new_state: TransportState) {
        *self.state.lock().expect("state mutex poisoned") = new_state;
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> TransportResult<()> {
        self.set_state(TransportState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.set_state(TransportState::Disconnected);
        // Closing our receiver makes the peer's sends fail.
        self.rx.lock().await.close();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.is_connected().await {
            return Err(TransportError::Closed);
        }
        trace!(size = frame.len(), "in-memory send");
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        if !self.is_connected().await {
            return Ok(None);
        }
        Ok(self.rx.lock().await.recv().await)
    }

    async fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    fn endpoint(&self) -> Option<String> {
        Some("memory://".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn pair_exchanges_frames_both_ways() {
        let (a, b) = InMemoryTransport::pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        a.send(Bytes::from_static(b"from-a")).await.unwrap();
        b.send(Bytes::from_static(b"from-b")).await.unwrap();

        assert_eq!(b.receive().await.unwrap().unwrap(), "from-a");
        assert_eq!(a.receive().await.unwrap().unwrap(), "from-b");
    }

    #[tokio::test]
    async fn send_after_peer_disconnect_fails() {
        let (a, b) = InMemoryTransport::pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        b.disconnect().await.unwrap();
        let result = a.send(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn receive_after_peer_drop_yields_none() {
        let (a, b) = InMemoryTransport::pair();
        a.connect().await.unwrap();
        drop(b);
        assert_eq!(a.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn frames_preserve_order() {
        let (a, b) = InMemoryTransport::pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        for i in 0u8..16 {
            a.send(Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0u8..16 {
            assert_eq!(b.receive().await.unwrap().unwrap(), Bytes::from(vec![i]));
        }
    }
}
