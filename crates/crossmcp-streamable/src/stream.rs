//! Outbound stream routing and the per-session transport.
//!
//! Each HTTP session owns one [`Peer`] dispatcher bound to a
//! [`SessionTransport`]. Inbound POST bodies are pushed into the transport;
//! outbound frames are routed by the [`OutboundRouter`]: responses go to the
//! SSE stream of the POST that carried their request, everything else to the
//! session's standalone GET stream.
//!
//! Every stream send queue is bounded. A POST stream that exceeds its bound
//! is closed; overflowing the standalone stream degrades the whole session
//! (the dispatcher sees a transport failure and fails pending waiters with
//! `connection closed`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, trace, warn};

use crossmcp_protocol::{JsonRpcMessage, JsonRpcResponse, RequestId};
use crossmcp_transport::{Transport, TransportError, TransportResult, TransportState};

use crate::event_store::EventStore;

/// One queued SSE event: optional resumption id, data payload, optional
/// retry hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseItem {
    pub(crate) id: Option<String>,
    pub(crate) data: String,
    pub(crate) retry: Option<u32>,
}

/// Sender half of one SSE stream's bounded queue.
#[derive(Debug, Clone)]
pub(crate) struct StreamSender {
    pub(crate) tx: mpsc::Sender<SseItem>,
    pub(crate) stream_id: String,
}

/// Routes outbound frames onto the session's SSE streams.
pub(crate) struct OutboundRouter {
    post_streams: DashMap<RequestId, StreamSender>,
    standalone: Mutex<Option<StreamSender>>,
    standalone_stream_id: String,
    event_store: Option<Arc<dyn EventStore>>,
}

impl std::fmt::Debug for OutboundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRouter")
            .field("post_streams", &self.post_streams.len())
            .field("standalone_open", &self.standalone.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl OutboundRouter {
    pub(crate) fn new(
        standalone_stream_id: String,
        event_store: Option<Arc<dyn EventStore>>,
    ) -> Self {
        Self {
            post_streams: DashMap::new(),
            standalone: Mutex::new(None),
            standalone_stream_id,
            event_store,
        }
    }

    pub(crate) fn standalone_stream_id(&self) -> &str {
        &self.standalone_stream_id
    }

    pub(crate) fn standalone_open(&self) -> bool {
        self.standalone.lock().is_some()
    }

    /// Install the standalone GET stream, replacing any dead predecessor.
    pub(crate) fn set_standalone(&self, sender: StreamSender) {
        *self.standalone.lock() = Some(sender);
    }

    /// Map each request id of one POST to that POST's stream.
    pub(crate) fn register_post_stream(&self, ids: &[RequestId], sender: &StreamSender) {
        for id in ids {
            self.post_streams.insert(id.clone(), sender.clone());
        }
    }

    /// Point a resumed stream's pending request ids at a fresh sender.
    pub(crate) fn reattach_stream(&self, stream_id: &str, sender: &StreamSender) {
        for mut entry in self.post_streams.iter_mut() {
            if entry.value().stream_id == stream_id {
                *entry.value_mut() = sender.clone();
            }
        }
    }

    /// Drop every stream; used at session termination.
    pub(crate) fn close_all(&self) {
        self.post_streams.clear();
        *self.standalone.lock() = None;
    }

    /// Route one encoded frame. `Err` means the session is degraded beyond
    /// recovery (standalone overflow) and must close.
    pub(crate) async fn route(&self, frame: &[u8]) -> TransportResult<()> {
        let message: JsonRpcMessage = match std::str::from_utf8(frame)
            .ok()
            .and_then(|text| JsonRpcMessage::decode(text).ok())
        {
            Some(message) => message,
            None => {
                return Err(TransportError::Framing(
                    "outbound frame is not valid JSON-RPC".to_string(),
                ));
            }
        };

        match message {
            JsonRpcMessage::Response(response) => self.route_response(response).await,
            JsonRpcMessage::Batch(items) => {
                for item in items {
                    match item {
                        JsonRpcMessage::Response(response) => {
                            self.route_response(response).await?;
                        }
                        other => {
                            self.route_to_standalone(&encode(&other)?).await?;
                        }
                    }
                }
                Ok(())
            }
            other => self.route_to_standalone(&encode(&other)?).await,
        }
    }

    async fn route_response(&self, response: JsonRpcResponse) -> TransportResult<()> {
        let payload = encode(&JsonRpcMessage::Response(response.clone()))?;
        let Some(id) = response.request_id() else {
            // Detached (null-id) error responses have no originating POST.
            return self.route_to_standalone(&payload).await;
        };

        let Some((_, sender)) = self.post_streams.remove(id) else {
            debug!(id = %id, "no stream for response; dropping");
            return Ok(());
        };

        let event_id = match &self.event_store {
            Some(store) => Some(store.append(&sender.stream_id, &payload).await.id),
            None => None,
        };
        let item = SseItem {
            id: event_id,
            data: payload,
            retry: None,
        };
        match sender.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Slow consumer: close this stream, keep the session alive.
                warn!(stream = %sender.stream_id, "POST stream queue full; closing stream");
                self.drop_stream(&sender.stream_id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(stream = %sender.stream_id, "POST stream consumer gone");
                Ok(())
            }
        }
    }

    async fn route_to_standalone(&self, payload: &str) -> TransportResult<()> {
        // Persist first so a disconnected client can resume this message.
        let event_id = match &self.event_store {
            Some(store) => Some(
                store
                    .append(&self.standalone_stream_id, payload)
                    .await
                    .id,
            ),
            None => None,
        };

        let sender = self.standalone.lock().clone();
        let Some(sender) = sender else {
            if self.event_store.is_some() {
                trace!("no standalone stream; message stored for resumption");
            } else {
                debug!("no standalone stream; dropping server-initiated message");
            }
            return Ok(());
        };

        let item = SseItem {
            id: event_id,
            data: payload.to_string(),
            retry: None,
        };
        match sender.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Client went away; clear the slot, messages keep being stored.
                *self.standalone.lock() = None;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("standalone stream queue full; session degraded");
                *self.standalone.lock() = None;
                Err(TransportError::SendFailed(
                    "standalone stream backpressure limit exceeded".to_string(),
                ))
            }
        }
    }

    fn drop_stream(&self, stream_id: &str) {
        self.post_streams
            .retain(|_, sender| sender.stream_id != stream_id);
    }
}

fn encode(message: &JsonRpcMessage) -> TransportResult<String> {
    message
        .encode()
        .map_err(|e| TransportError::Framing(e.to_string()))
}

/// Transport binding one HTTP session's dispatcher to the engine: POST
/// bodies arrive through an inbound channel, outbound frames go through the
/// router.
pub(crate) struct SessionTransport {
    connected: AtomicBool,
    inbound_rx: TokioMutex<Option<mpsc::Receiver<Bytes>>>,
    router: Arc<OutboundRouter>,
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl SessionTransport {
    pub(crate) fn new(inbound_rx: mpsc::Receiver<Bytes>, router: Arc<OutboundRouter>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            inbound_rx: TokioMutex::new(Some(inbound_rx)),
            router,
        }
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn connect(&self) -> TransportResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.inbound_rx.lock().await = None;
        self.router.close_all();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.router.route(&frame).await
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    async fn state(&self) -> TransportState {
        if self.connected.load(Ordering::SeqCst) {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some("streamable-http://".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use serde_json::json;

    fn response_frame(id: serde_json::Value) -> Bytes {
        Bytes::from(json!({"jsonrpc": "2.0", "id": id, "result": {}}).to_string())
    }

    #[tokio::test]
    async fn response_routes_to_registered_post_stream() {
        let router = OutboundRouter::new("standalone".to_string(), None);
        let (tx, mut rx) = mpsc::channel(4);
        let sender = StreamSender {
            tx,
            stream_id: "post-1".to_string(),
        };
        router.register_post_stream(&[RequestId::Number(1)], &sender);
        drop(sender);

        router.route(&response_frame(json!(1))).await.unwrap();
        let item = rx.recv().await.unwrap();
        assert!(item.data.contains("\"result\""));
        // The routed response consumed the last sender; the stream ends.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn notification_routes_to_standalone() {
        let router = OutboundRouter::new("standalone".to_string(), None);
        let (tx, mut rx) = mpsc::channel(4);
        router.set_standalone(StreamSender {
            tx,
            stream_id: "standalone".to_string(),
        });

        let frame = Bytes::from(
            json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}).to_string(),
        );
        router.route(&frame).await.unwrap();
        let item = rx.recv().await.unwrap();
        assert!(item.data.contains("tools/list_changed"));
        assert!(item.id.is_none());
    }

    #[tokio::test]
    async fn events_get_ids_iff_store_configured() {
        let store = Arc::new(InMemoryEventStore::new());
        let router = OutboundRouter::new("standalone".to_string(), Some(store));
        let (tx, mut rx) = mpsc::channel(4);
        router.set_standalone(StreamSender {
            tx,
            stream_id: "standalone".to_string(),
        });

        let frame =
            Bytes::from(json!({"jsonrpc": "2.0", "method": "notifications/progress"}).to_string());
        router.route(&frame).await.unwrap();
        let item = rx.recv().await.unwrap();
        assert!(item.id.as_deref().unwrap().starts_with("standalone_"));
    }

    #[tokio::test]
    async fn standalone_overflow_degrades_session() {
        let router = OutboundRouter::new("standalone".to_string(), None);
        let (tx, _rx) = mpsc::channel(1);
        router.set_standalone(StreamSender {
            tx,
            stream_id: "standalone".to_string(),
        });

        let frame =
            Bytes::from(json!({"jsonrpc": "2.0", "method": "notifications/progress"}).to_string());
        router.route(&frame).await.unwrap();
        let result = router.route(&frame).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        assert!(!router.standalone_open());
    }

    #[tokio::test]
    async fn messages_without_standalone_are_stored_when_store_configured() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let router = OutboundRouter::new("standalone".to_string(), Some(Arc::clone(&store)));

        let frame =
            Bytes::from(json!({"jsonrpc": "2.0", "method": "notifications/progress"}).to_string());
        router.route(&frame).await.unwrap();

        let replay = store.replay_after("standalone_18446744073709551614").await;
        // Unknown anchor, but the stream exists with one event from seq 0.
        assert!(replay.is_some_and(|r| r.events.is_empty()));
    }
}
