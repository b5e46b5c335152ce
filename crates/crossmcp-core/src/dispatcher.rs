//! The per-peer dispatch engine.
//!
//! A [`Peer`] owns one connection's protocol state: the outbound pending map,
//! the inbound in-flight map, the id counter, the handler registry, and the
//! negotiated session data. Frames are decoded in arrival order on a single
//! reader task; handler execution and caller awaits run in parallel on
//! spawned tasks.
//!
//! Invariants enforced here:
//!
//! - every outbound id sits in the pending map for exactly the interval
//!   between send and completion (response, timeout, cancellation, close);
//! - every inbound request with a running handler sits in the in-flight map
//!   until the handler terminates;
//! - a cancelled inbound handler emits no response frame;
//! - after close, neither map accepts new entries and all waiters fail with
//!   `connection closed`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crossmcp_protocol::capabilities::PeerCapabilities;
use crossmcp_protocol::types::{CancelledParams, Implementation};
use crossmcp_protocol::{
    methods, notifications, version, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponsePayload, McpError, McpResult, RequestId,
};
use crossmcp_transport::Transport;

use crate::context::{AuthInfo, RequestContext, RequestInfo};
use crate::registry::{
    HandlerRegistry, ListenerHandle, NotificationHandler, RequestHandler,
};

/// Options for one outbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Fail the request (and notify the peer) if no response arrives in time.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with a timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

struct PeerInner {
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    outbound: DashMap<RequestId, oneshot::Sender<McpResult<Value>>>,
    inflight: DashMap<RequestId, CancellationToken>,
    next_id: AtomicI64,
    closed: AtomicBool,
    strict: AtomicBool,
    peer_capabilities: RwLock<Option<PeerCapabilities>>,
    peer_info: RwLock<Option<Implementation>>,
    negotiated_version: RwLock<Option<String>>,
    auth: RwLock<Option<AuthInfo>>,
    request_info: RwLock<Option<RequestInfo>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// One peer connection's dispatcher. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("pending", &self.inner.outbound.len())
            .field("inflight", &self.inner.inflight.len())
            .finish_non_exhaustive()
    }
}

impl Peer {
    /// Create a dispatcher over a transport. Call [`Peer::start`] to begin
    /// reading frames.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                transport,
                registry: HandlerRegistry::new(),
                outbound: DashMap::new(),
                inflight: DashMap::new(),
                next_id: AtomicI64::new(0),
                closed: AtomicBool::new(false),
                strict: AtomicBool::new(false),
                peer_capabilities: RwLock::new(None),
                peer_info: RwLock::new(None),
                negotiated_version: RwLock::new(None),
                auth: RwLock::new(None),
                request_info: RwLock::new(None),
                reader_task: Mutex::new(None),
            }),
        }
    }

    /// Connect the transport and spawn the frame reader.
    pub async fn start(&self) -> McpResult<()> {
        self.inner.transport.connect().await?;
        let peer = self.clone();
        let handle = tokio::spawn(async move { peer.read_loop().await });
        *self.inner.reader_task.lock() = Some(handle);
        Ok(())
    }

    /// Close the session: cancel every inbound handler task, fail every
    /// outbound waiter with `connection closed`, disconnect the transport.
    pub async fn stop(&self) {
        self.shutdown(true).await;
    }

    /// True once the session has closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The handler registry for this connection.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Register (or replace) the handler for a request method.
    pub fn on_request(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.inner.registry.set_request_handler(method, handler);
    }

    /// Register a notification listener; drop the handle to deregister.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        listener: Arc<dyn NotificationHandler>,
    ) -> ListenerHandle {
        self.inner.registry.add_notification_listener(method, listener)
    }

    /// Enable strict mode: outbound requests the peer has not advertised the
    /// capability for fail locally with `method not found`.
    pub fn set_strict(&self, strict: bool) {
        self.inner.strict.store(strict, Ordering::SeqCst);
    }

    /// Record the peer's negotiated capability set.
    pub fn set_peer_capabilities(&self, capabilities: PeerCapabilities) {
        *self.inner.peer_capabilities.write() = Some(capabilities);
    }

    /// The peer's capability set, once negotiated.
    pub fn peer_capabilities(&self) -> Option<PeerCapabilities> {
        self.inner.peer_capabilities.read().clone()
    }

    /// Record the peer's implementation info.
    pub fn set_peer_info(&self, info: Implementation) {
        *self.inner.peer_info.write() = Some(info);
    }

    /// The peer's implementation info, once exchanged.
    pub fn peer_info(&self) -> Option<Implementation> {
        self.inner.peer_info.read().clone()
    }

    /// Record the negotiated protocol version.
    pub fn set_negotiated_version(&self, version: impl Into<String>) {
        *self.inner.negotiated_version.write() = Some(version.into());
    }

    /// The negotiated protocol version, once exchanged.
    pub fn negotiated_version(&self) -> Option<String> {
        self.inner.negotiated_version.read().clone()
    }

    /// Attach verified authentication info for this connection.
    pub fn set_auth_info(&self, auth: AuthInfo) {
        *self.inner.auth.write() = Some(auth);
    }

    pub(crate) fn auth_info(&self) -> Option<AuthInfo> {
        self.inner.auth.read().clone()
    }

    /// Attach transport request info (HTTP headers) for this connection.
    pub fn set_request_info(&self, info: RequestInfo) {
        *self.inner.request_info.write() = Some(info);
    }

    pub(crate) fn request_info(&self) -> Option<RequestInfo> {
        self.inner.request_info.read().clone()
    }

    /// Send a request and await its response.
    ///
    /// Allocates a fresh numeric id. With a timeout set, expiry fails the
    /// caller with `request timed out` and notifies the peer via
    /// `notifications/cancelled`. Dropping the returned future while it is
    /// pending removes the waiter and emits the same best-effort
    /// cancellation.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.send_request_with_id(id, method, params, options).await
    }

    /// Send a request with a caller-supplied id.
    pub async fn send_request_with_id(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }

        if self.inner.strict.load(Ordering::SeqCst) {
            let gated = self
                .inner
                .peer_capabilities
                .read()
                .as_ref()
                .is_some_and(|caps| !caps.allows(method));
            if gated {
                debug!(method, "strict mode: peer lacks capability");
                return Err(McpError::method_not_found(method));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.inner.outbound.insert(id.clone(), tx);
        let mut guard = WaiterGuard {
            peer: self.clone(),
            id: id.clone(),
            armed: true,
        };

        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(err) = self.send_raw(JsonRpcMessage::Request(request)).await {
            guard.armed = false;
            self.inner.outbound.remove(&id);
            return Err(err);
        }

        let outcome = match options.timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    guard.armed = false;
                    self.inner.outbound.remove(&id);
                    let timeout_ms = duration.as_millis() as u64;
                    let reason = format!("request timed out after {timeout_ms} ms");
                    if let Err(e) = self.notify_cancelled(Some(id), Some(reason)).await {
                        debug!(error = %e, "failed to emit timeout cancellation");
                    }
                    return Err(McpError::RequestTimeout { timeout_ms });
                }
            },
            None => rx.await,
        };

        guard.armed = false;
        match outcome {
            Ok(result) => result,
            // Sender dropped without resolution: the session closed.
            Err(_) => Err(McpError::ConnectionClosed),
        }
    }

    /// Fire-and-forget notification.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send_raw(JsonRpcMessage::Notification(JsonRpcNotification::new(
            method, params,
        )))
        .await
    }

    /// Cancel a request previously sent through this peer: the local waiter
    /// (if any) fails with `request cancelled`, and the peer is notified.
    pub async fn cancel_request(&self, id: RequestId, reason: Option<String>) -> McpResult<()> {
        if let Some((_, tx)) = self.inner.outbound.remove(&id) {
            let _ = tx.send(Err(McpError::cancelled(reason.clone())));
        }
        self.notify_cancelled(Some(id), reason).await
    }

    /// Send any JSON-RPC message over this connection. A transport failure
    /// closes the session.
    pub async fn send_raw(&self, message: JsonRpcMessage) -> McpResult<()> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }
        let text = message.encode()?;
        trace!(size = text.len(), "sending frame");
        match self.inner.transport.send(Bytes::from(text)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "transport send failed; closing session");
                self.shutdown(true).await;
                Err(McpError::ConnectionClosed)
            }
        }
    }

    /// Emit `notifications/cancelled`.
    async fn notify_cancelled(
        &self,
        request_id: Option<RequestId>,
        reason: Option<String>,
    ) -> McpResult<()> {
        let params = CancelledParams { request_id, reason };
        self.send_notification(
            notifications::CANCELLED,
            Some(serde_json::to_value(&params)?),
        )
        .await
    }

    async fn read_loop(self) {
        loop {
            match self.inner.transport.receive().await {
                Ok(Some(frame)) => self.handle_frame(frame).await,
                Ok(None) => {
                    debug!("transport closed by peer");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "transport receive failed");
                    break;
                }
            }
            if self.is_closed() {
                break;
            }
        }
        self.shutdown(false).await;
    }

    /// Decode one frame and hand it off. Runs on the reader task: decoding
    /// stays in frame order; notification listeners run cooperatively here
    /// (so `notifications/initialized` is observed before the next request),
    /// while request handlers are spawned.
    async fn handle_frame(&self, frame: Bytes) {
        let text = match std::str::from_utf8(&frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "dropping non-UTF-8 frame");
                self.reply_decode_error(crossmcp_protocol::ProtocolError::InvalidJson(
                    err.to_string(),
                ));
                return;
            }
        };
        match JsonRpcMessage::decode(text) {
            Ok(message) => self.dispatch_message(message).await,
            Err(err) => {
                warn!(error = %err, "failed to decode frame");
                self.reply_decode_error(err);
            }
        }
    }

    /// Malformed input never kills the session; reply with an `id: null`
    /// error response and keep serving.
    fn reply_decode_error(&self, err: crossmcp_protocol::ProtocolError) {
        let response = JsonRpcResponse::error_detached(err.to_wire());
        let peer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = peer.send_raw(JsonRpcMessage::Response(response)).await {
                debug!(error = %e, "failed to send decode error response");
            }
        });
    }

    async fn dispatch_message(&self, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => self.resolve_response(response),
            JsonRpcMessage::Request(request) => {
                let peer = self.clone();
                tokio::spawn(async move {
                    if let Some(response) = peer.execute_request(request).await {
                        if let Err(e) = peer.send_raw(JsonRpcMessage::Response(response)).await {
                            debug!(error = %e, "failed to send response");
                        }
                    }
                });
            }
            JsonRpcMessage::Notification(notification) => {
                self.dispatch_notification(notification).await;
            }
            JsonRpcMessage::Batch(items) => {
                let peer = self.clone();
                tokio::spawn(async move { peer.execute_batch(items).await });
            }
        }
    }

    /// Route a response to its parked waiter. A response for an unknown id is
    /// dropped: late responses after cancellation are legal.
    fn resolve_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.request_id().cloned() else {
            debug!("dropping response with null id");
            return;
        };
        match self.inner.outbound.remove(&id) {
            Some((_, tx)) => {
                let outcome = match response.payload {
                    JsonRpcResponsePayload::Success { result } => Ok(result),
                    JsonRpcResponsePayload::Error { error } => Err(McpError::from_wire(error)),
                };
                let _ = tx.send(outcome);
            }
            None => debug!(id = %id, "dropping response for unknown request id"),
        }
    }

    async fn dispatch_notification(&self, notification: JsonRpcNotification) {
        if notification.method == notifications::CANCELLED {
            let params = notification
                .params
                .as_ref()
                .and_then(|p| serde_json::from_value::<CancelledParams>(p.clone()).ok())
                .unwrap_or_default();
            match params.request_id {
                Some(id) => {
                    // Cancel the matching in-flight handler; unknown ids are a
                    // no-op since the notification is best-effort.
                    match self.inner.inflight.get(&id) {
                        Some(entry) => {
                            debug!(id = %id, reason = ?params.reason, "cancelling in-flight request");
                            entry.value().cancel();
                        }
                        None => debug!(id = %id, "cancellation for unknown request id"),
                    }
                    return;
                }
                None => {
                    // General cancellation (>= 2025-11-25): no id cancels
                    // everything in flight.
                    let supported = self
                        .inner
                        .negotiated_version
                        .read()
                        .as_deref()
                        .is_some_and(version::supports_general_cancellation);
                    if supported {
                        debug!("general cancellation: cancelling all in-flight requests");
                        for entry in self.inner.inflight.iter() {
                            entry.value().cancel();
                        }
                    }
                }
            }
        }

        let listeners = self
            .inner
            .registry
            .notification_listeners(&notification.method);
        for listener in listeners {
            if let Err(err) = listener.handle(notification.params.clone()).await {
                warn!(method = %notification.method, error = %err, "notification listener failed");
            }
        }
    }

    /// Run the handler for one inbound request. Returns the response to
    /// transmit, or `None` when cancellation suppressed it.
    async fn execute_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if self.is_closed() {
            return None;
        }
        let Some(handler) = self.inner.registry.request_handler(&request.method) else {
            debug!(method = %request.method, "no handler registered");
            return Some(JsonRpcResponse::error(
                request.id,
                McpError::method_not_found(&request.method).to_wire(),
            ));
        };

        let token = CancellationToken::new();
        self.inner.inflight.insert(request.id.clone(), token.clone());
        let ctx = RequestContext::new(
            request.id.clone(),
            request.meta().cloned(),
            token.clone(),
            self.clone(),
        );

        let outcome = tokio::select! {
            () = token.cancelled() => None,
            result = handler.handle(request.params.clone(), ctx) => Some(result),
        };
        self.inner.inflight.remove(&request.id);

        match outcome {
            None => {
                debug!(id = %request.id, "request cancelled; suppressing response");
                None
            }
            Some(Ok(result)) => Some(JsonRpcResponse::success(request.id, result)),
            Some(Err(err)) => Some(JsonRpcResponse::error(request.id, err.to_wire())),
        }
    }

    /// Process a batch: elements run independently, responses for requests
    /// are collected into one response batch, notifications produce nothing.
    async fn execute_batch(&self, items: Vec<JsonRpcMessage>) {
        let mut pending: Vec<BoxFuture<'static, Option<JsonRpcResponse>>> = Vec::new();
        for item in items {
            match item {
                JsonRpcMessage::Request(request) => {
                    if request.method == methods::INITIALIZE {
                        // Initialize must be the sole request of its frame.
                        let response = JsonRpcResponse::error(
                            request.id,
                            McpError::InvalidRequest(
                                "initialize must not be batched".to_string(),
                            )
                            .to_wire(),
                        );
                        pending.push(Box::pin(async move { Some(response) }));
                    } else {
                        let peer = self.clone();
                        pending.push(Box::pin(
                            async move { peer.execute_request(request).await },
                        ));
                    }
                }
                JsonRpcMessage::Response(response) => self.resolve_response(response),
                JsonRpcMessage::Notification(notification) => {
                    self.dispatch_notification(notification).await;
                }
                // The codec rejects nested batches at decode time.
                JsonRpcMessage::Batch(_) => {}
            }
        }

        let responses: Vec<JsonRpcResponse> =
            join_all(pending).await.into_iter().flatten().collect();
        if responses.is_empty() {
            return;
        }
        let batch =
            JsonRpcMessage::Batch(responses.into_iter().map(JsonRpcMessage::Response).collect());
        if let Err(err) = self.send_raw(batch).await {
            debug!(error = %err, "failed to send batch response");
        }
    }

    async fn shutdown(&self, abort_reader: bool) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing peer session");

        let pending: Vec<RequestId> = self
            .inner
            .outbound
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in pending {
            if let Some((_, tx)) = self.inner.outbound.remove(&id) {
                let _ = tx.send(Err(McpError::ConnectionClosed));
            }
        }

        for entry in self.inner.inflight.iter() {
            entry.value().cancel();
        }
        self.inner.inflight.clear();

        if abort_reader {
            if let Some(handle) = self.inner.reader_task.lock().take() {
                handle.abort();
            }
        }

        if let Err(err) = self.inner.transport.disconnect().await {
            debug!(error = %err, "transport disconnect failed");
        }
    }
}

/// Removes the waiter and emits a best-effort cancellation when the caller's
/// future is dropped before the request completes.
struct WaiterGuard {
    peer: Peer,
    id: RequestId,
    armed: bool,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.peer.inner.outbound.remove(&self.id).is_none() {
            return;
        }
        let peer = self.peer.clone();
        let id = self.id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = peer.notify_cancelled(Some(id), None).await {
                    debug!(error = %err, "failed to emit drop cancellation");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossmcp_transport::InMemoryTransport;

    #[tokio::test]
    async fn send_request_fails_after_stop() {
        let (a, _b) = InMemoryTransport::pair();
        let peer = Peer::new(Arc::new(a));
        peer.start().await.unwrap();
        peer.stop().await;

        let result = peer
            .send_request("ping", None, RequestOptions::default())
            .await;
        assert!(matches!(result, Err(McpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn strict_mode_gates_ungranted_capability() {
        let (a, _b) = InMemoryTransport::pair();
        let peer = Peer::new(Arc::new(a));
        peer.start().await.unwrap();
        peer.set_strict(true);
        peer.set_peer_capabilities(PeerCapabilities::Client(
            crossmcp_protocol::ClientCapabilities::default(),
        ));

        let result = peer
            .send_request(methods::LIST_ROOTS, None, RequestOptions::default())
            .await;
        assert!(matches!(result, Err(McpError::MethodNotFound(_))));
        // Nothing touched the wire, so the pending map stayed empty.
        assert_eq!(peer.inner.outbound.len(), 0);
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let (a, _b) = InMemoryTransport::pair();
        let peer = Peer::new(Arc::new(a));
        let first = peer.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let second = peer.inner.next_id.fetch_add(1, Ordering::SeqCst);
        assert!(second > first);
    }
}
