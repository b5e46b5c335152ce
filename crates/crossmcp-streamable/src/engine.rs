//! The Streamable HTTP engine: a single-endpoint axum service mapping
//! JSON-RPC flows onto POST/GET/DELETE with SSE.
//!
//! - POST bodies holding requests open a per-POST SSE stream carrying each
//!   response, then close; notification/response-only bodies get 202.
//! - GET opens the session's single standalone SSE stream for
//!   server-initiated messages (second GET: 409), or resumes a stream via
//!   `Last-Event-ID` when an event store is configured.
//! - DELETE terminates the session.
//!
//! Every connection is served by a full dispatcher (`crossmcp-server`
//! lifecycle included), so cancellation, timeouts, and bidirectional
//! requests behave exactly as on pipe transports.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crossmcp_core::Peer;
use crossmcp_protocol::{
    methods, version, JsonRpcError, JsonRpcMessage, JsonRpcResponse, McpResult, ProtocolError,
    RequestId,
};
use crossmcp_server::Server;

use crate::config::StreamableHttpConfig;
use crate::stream::{OutboundRouter, SessionTransport, SseItem, StreamSender};

const SESSION_ID_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Frames buffered from POST bodies toward the dispatcher.
const INBOUND_QUEUE_DEPTH: usize = 256;

/// One tracked HTTP session.
pub(crate) struct HttpSession {
    id: Option<String>,
    peer: Peer,
    router: Arc<OutboundRouter>,
    inbound_tx: mpsc::Sender<Bytes>,
    last_active: Mutex<Instant>,
    saw_initialize: AtomicBool,
}

impl HttpSession {
    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.last_active.lock().elapsed() > ttl
    }
}

struct EngineInner {
    config: StreamableHttpConfig,
    server: Arc<Server>,
    sessions: DashMap<String, Arc<HttpSession>>,
    stateless_session: TokioMutex<Option<Arc<HttpSession>>>,
}

/// The Streamable HTTP engine. Clones share all state.
#[derive(Clone)]
pub struct StreamableHttpEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for StreamableHttpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpEngine")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

impl StreamableHttpEngine {
    /// Build an engine serving `server` under `config`.
    pub fn new(server: Arc<Server>, config: StreamableHttpConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                server,
                sessions: DashMap::new(),
                stateless_session: TokioMutex::new(None),
            }),
        }
    }

    /// The axum router exposing the single MCP endpoint. Unsupported methods
    /// get 405 from axum's method routing.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.inner.config.endpoint_path,
                post(post_handler).get(get_handler).delete(delete_handler),
            )
            .with_state(self.clone())
    }

    /// The server whose handlers this engine exposes.
    pub fn server(&self) -> &Arc<Server> {
        &self.inner.server
    }

    /// Number of live stateful sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Terminate sessions idle past the configured TTL; returns how many.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.inner.config.session_ttl;
        let expired: Vec<String> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().expired(ttl))
            .map(|entry| entry.key().clone())
            .collect();
        for id in &expired {
            debug!(session = %id, "expiring idle session");
            self.terminate_session(id).await;
        }
        expired.len()
    }

    /// Terminate one session: close its streams and stop its dispatcher.
    pub async fn terminate_session(&self, id: &str) -> bool {
        match self.inner.sessions.remove(id) {
            Some((_, session)) => {
                session.peer.stop().await;
                session.router.close_all();
                true
            }
            None => false,
        }
    }

    async fn new_session(&self, id: Option<String>) -> McpResult<Arc<HttpSession>> {
        let standalone_stream_id = format!("standalone-{}", Uuid::new_v4());
        let router = Arc::new(OutboundRouter::new(
            standalone_stream_id,
            self.inner.config.event_store.clone(),
        ));
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let transport = SessionTransport::new(inbound_rx, Arc::clone(&router));
        let peer = self.inner.server.serve(Arc::new(transport)).await?;
        Ok(Arc::new(HttpSession {
            id,
            peer,
            router,
            inbound_tx,
            last_active: Mutex::new(Instant::now()),
            saw_initialize: AtomicBool::new(false),
        }))
    }

    /// Session for an initialize POST: a fresh one in stateful mode, the
    /// shared one in stateless mode.
    async fn create_session(&self) -> Result<Arc<HttpSession>, Response> {
        match &self.inner.config.session_id_generator {
            Some(generator) => {
                let id = generator();
                let session = self
                    .new_session(Some(id.clone()))
                    .await
                    .map_err(internal_error)?;
                self.inner.sessions.insert(id, Arc::clone(&session));
                Ok(session)
            }
            None => {
                let mut slot = self.inner.stateless_session.lock().await;
                if let Some(existing) = slot.as_ref() {
                    if existing.saw_initialize.load(Ordering::SeqCst) {
                        return Err(jsonrpc_error(
                            StatusCode::BAD_REQUEST,
                            ProtocolError::InvalidRequest(
                                "initialize already received".to_string(),
                            )
                            .to_wire(),
                        ));
                    }
                    return Ok(Arc::clone(existing));
                }
                let session = self.new_session(None).await.map_err(internal_error)?;
                *slot = Some(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Session for a non-initialize request, per the session id rule.
    async fn resolve_session(&self, headers: &HeaderMap) -> Result<Arc<HttpSession>, Response> {
        if self.inner.config.is_stateful() {
            let Some(id) = header_str(headers, SESSION_ID_HEADER) else {
                return Err(jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    ProtocolError::InvalidRequest("missing Mcp-Session-Id header".to_string())
                        .to_wire(),
                ));
            };
            let session = match self.inner.sessions.get(id) {
                Some(entry) => Arc::clone(entry.value()),
                None => return Err(StatusCode::NOT_FOUND.into_response()),
            };
            if session.expired(self.inner.config.session_ttl) {
                let id = id.to_string();
                self.terminate_session(&id).await;
                return Err(StatusCode::NOT_FOUND.into_response());
            }
            Ok(session)
        } else {
            let mut slot = self.inner.stateless_session.lock().await;
            match slot.as_ref() {
                Some(session) => Ok(Arc::clone(session)),
                None => {
                    let session = self.new_session(None).await.map_err(internal_error)?;
                    *slot = Some(Arc::clone(&session));
                    Ok(session)
                }
            }
        }
    }

    /// Open the SSE stream answering one request-bearing POST.
    async fn open_post_stream(
        &self,
        session: Arc<HttpSession>,
        ids: Vec<RequestId>,
        body: Bytes,
    ) -> Response {
        let config = &self.inner.config;
        let stream_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(config.stream_queue_depth);
        let sender = StreamSender {
            tx: tx.clone(),
            stream_id: stream_id.clone(),
        };

        // Priming event: publish a resumption anchor before any substantive
        // event, for sessions new enough to understand it.
        if let Some(store) = &config.event_store {
            let primed = session
                .peer
                .negotiated_version()
                .as_deref()
                .is_some_and(version::supports_priming);
            if primed {
                let stored = store.append(&stream_id, "").await;
                let _ = tx
                    .send(SseItem {
                        id: Some(stored.id),
                        data: String::new(),
                        retry: config.sse_retry_ms,
                    })
                    .await;
            }
        }

        session.router.register_post_stream(&ids, &sender);
        drop(sender);
        drop(tx);

        if session.inbound_tx.send(body).await.is_err() {
            warn!("session dispatcher is gone; rejecting POST");
            return StatusCode::NOT_FOUND.into_response();
        }
        self.sse_response(&session, rx)
    }

    fn sse_response(&self, session: &HttpSession, rx: mpsc::Receiver<SseItem>) -> Response {
        let sse = Sse::new(sse_event_stream(rx))
            .keep_alive(KeepAlive::new().interval(self.inner.config.keepalive));
        let mut response = sse.into_response();
        if let Some(id) = &session.id {
            if let Ok(value) = HeaderValue::from_str(id) {
                response.headers_mut().insert(SESSION_ID_HEADER, value);
            }
        }
        let negotiated = session
            .peer
            .negotiated_version()
            .unwrap_or_else(|| version::LATEST_VERSION.to_string());
        if let Ok(value) = HeaderValue::from_str(&negotiated) {
            response
                .headers_mut()
                .insert(PROTOCOL_VERSION_HEADER, value);
        }
        response
    }
}

fn sse_event_stream(
    mut rx: mpsc::Receiver<SseItem>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(item) = rx.recv().await {
            let mut event = Event::default().data(item.data);
            if let Some(id) = item.id {
                event = event.id(id);
            }
            if let Some(retry) = item.retry {
                event = event.retry(Duration::from_millis(u64::from(retry)));
            }
            yield Ok(event);
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn jsonrpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error_detached(error))).into_response()
}

fn internal_error(err: crossmcp_protocol::McpError) -> Response {
    warn!(error = %err, "failed to create session");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Validate `MCP-Protocol-Version` against the session's negotiated version.
/// A missing header is accepted for compatibility; a mismatching one yields
/// the 400 to return. Applies to every non-initialize request, whichever
/// verb carried it.
fn check_protocol_version(headers: &HeaderMap, session: &HttpSession) -> Option<Response> {
    let requested = header_str(headers, PROTOCOL_VERSION_HEADER)?;
    let negotiated = session.peer.negotiated_version()?;
    if requested == negotiated {
        return None;
    }
    Some(jsonrpc_error(
        StatusCode::BAD_REQUEST,
        ProtocolError::InvalidRequest(format!(
            "protocol version mismatch: session negotiated {negotiated}, \
             request carried {requested}"
        ))
        .to_wire(),
    ))
}

fn collect_request_ids(message: &JsonRpcMessage) -> Vec<RequestId> {
    match message {
        JsonRpcMessage::Request(request) => vec![request.id.clone()],
        JsonRpcMessage::Batch(items) => items
            .iter()
            .filter_map(|item| match item {
                JsonRpcMessage::Request(request) => Some(request.id.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

async fn post_handler(
    State(engine): State<StreamableHttpEngine>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = &engine.inner.config;

    if !config.host_policy.permits(header_str(&headers, "host")) {
        return StatusCode::MISDIRECTED_REQUEST.into_response();
    }
    let accept = header_str(&headers, "accept").unwrap_or("");
    if !accept.contains("application/json") || !accept.contains("text/event-stream") {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    let content_type = header_str(&headers, "content-type").unwrap_or("");
    if !content_type.starts_with("application/json") {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    let Ok(text) = std::str::from_utf8(&body) else {
        return jsonrpc_error(
            StatusCode::BAD_REQUEST,
            ProtocolError::InvalidJson("body is not UTF-8".to_string()).to_wire(),
        );
    };
    let message = match JsonRpcMessage::decode(text) {
        Ok(message) => message,
        Err(err) => return jsonrpc_error(StatusCode::BAD_REQUEST, err.to_wire()),
    };

    if let JsonRpcMessage::Batch(items) = &message {
        let has_initialize = items
            .iter()
            .any(|item| item.method() == Some(methods::INITIALIZE));
        if has_initialize {
            return jsonrpc_error(
                StatusCode::BAD_REQUEST,
                ProtocolError::InvalidRequest("initialize must not be batched".to_string())
                    .to_wire(),
            );
        }
    }

    let is_initialize =
        matches!(&message, JsonRpcMessage::Request(r) if r.method == methods::INITIALIZE);

    if is_initialize {
        if header_str(&headers, SESSION_ID_HEADER).is_some() {
            return jsonrpc_error(
                StatusCode::BAD_REQUEST,
                ProtocolError::InvalidRequest(
                    "initialize on an already-initialized session".to_string(),
                )
                .to_wire(),
            );
        }
        let session = match engine.create_session().await {
            Ok(session) => session,
            Err(response) => return response,
        };
        session.saw_initialize.store(true, Ordering::SeqCst);
        let ids = collect_request_ids(&message);
        return engine.open_post_stream(session, ids, body).await;
    }

    let session = match engine.resolve_session(&headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    if let Some(response) = check_protocol_version(&headers, &session) {
        return response;
    }
    session.touch();

    let ids = collect_request_ids(&message);
    if ids.is_empty() {
        // Notifications and responses produce no stream, only an ack.
        if session.inbound_tx.send(body).await.is_err() {
            return StatusCode::NOT_FOUND.into_response();
        }
        return StatusCode::ACCEPTED.into_response();
    }
    engine.open_post_stream(session, ids, body).await
}

async fn get_handler(State(engine): State<StreamableHttpEngine>, headers: HeaderMap) -> Response {
    let config = &engine.inner.config;

    if !config.host_policy.permits(header_str(&headers, "host")) {
        return StatusCode::MISDIRECTED_REQUEST.into_response();
    }
    let accept = header_str(&headers, "accept").unwrap_or("");
    if !accept.contains("text/event-stream") {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let session = match engine.resolve_session(&headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    if let Some(response) = check_protocol_version(&headers, &session) {
        return response;
    }
    session.touch();

    // Resumption: replay stored events past the client's anchor, then attach
    // the new stream for live delivery.
    if let (Some(last_event_id), Some(store)) = (
        header_str(&headers, LAST_EVENT_ID_HEADER),
        &config.event_store,
    ) {
        if let Some(replay) = store.replay_after(last_event_id).await {
            let capacity = config.stream_queue_depth + replay.events.len();
            let (tx, rx) = mpsc::channel(capacity);
            for event in replay.events {
                let _ = tx
                    .send(SseItem {
                        id: Some(event.id),
                        data: event.payload,
                        retry: None,
                    })
                    .await;
            }
            let sender = StreamSender {
                tx,
                stream_id: replay.stream_id.clone(),
            };
            if replay.stream_id == session.router.standalone_stream_id() {
                session.router.set_standalone(sender);
            } else {
                session.router.reattach_stream(&replay.stream_id, &sender);
            }
            return engine.sse_response(&session, rx);
        }
        debug!(last_event_id, "unknown resumption anchor; opening standalone stream");
    }

    if session.router.standalone_open() {
        return StatusCode::CONFLICT.into_response();
    }
    let (tx, rx) = mpsc::channel(config.stream_queue_depth);
    session.router.set_standalone(StreamSender {
        tx,
        stream_id: session.router.standalone_stream_id().to_string(),
    });
    engine.sse_response(&session, rx)
}

async fn delete_handler(
    State(engine): State<StreamableHttpEngine>,
    headers: HeaderMap,
) -> Response {
    let config = &engine.inner.config;

    if !config.host_policy.permits(header_str(&headers, "host")) {
        return StatusCode::MISDIRECTED_REQUEST.into_response();
    }
    if !config.is_stateful() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let Some(id) = header_str(&headers, SESSION_ID_HEADER) else {
        return jsonrpc_error(
            StatusCode::BAD_REQUEST,
            ProtocolError::InvalidRequest("missing Mcp-Session-Id header".to_string()).to_wire(),
        );
    };
    let id = id.to_string();
    let Some(session) = engine
        .inner
        .sessions
        .get(&id)
        .map(|entry| Arc::clone(entry.value()))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(response) = check_protocol_version(&headers, &session) {
        return response;
    }
    drop(session);

    if engine.terminate_session(&id).await {
        debug!(session = %id, "session terminated by client");
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
