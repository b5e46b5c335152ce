//! Client-side Streamable HTTP transport.
//!
//! Maps the frame-pipe [`Transport`] contract onto the HTTP engine's wire
//! protocol: every outbound frame is a POST to the single MCP endpoint;
//! responses stream back over the POST's SSE body; server-initiated messages
//! arrive on a standalone GET stream the transport opens once it learns its
//! session id. Dropped standalone streams reconnect with backoff, sending
//! `Last-Event-ID` so a resumption-capable server replays what was missed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, trace, warn};

use crossmcp_transport::{Transport, TransportError, TransportResult, TransportState};

use crate::sse::SseParser;

/// Backoff policy for standalone-stream reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; doubles each attempt
    pub base: Duration,
    /// Ceiling for the per-attempt delay
    pub max_delay: Duration,
    /// Give up after this many attempts (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        Some(exp.min(self.max_delay))
    }
}

/// Configuration for [`StreamableHttpClientTransport`].
#[derive(Debug, Clone)]
pub struct StreamableHttpClientConfig {
    /// Full endpoint URL, e.g. `http://127.0.0.1:3000/`
    pub url: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Bearer token attached to every request, if set
    pub auth_token: Option<String>,
    /// `MCP-Protocol-Version` header value for non-initialize requests; a
    /// missing header is accepted by conforming servers
    pub protocol_version: Option<String>,
    /// Standalone-stream reconnect policy
    pub reconnect: ReconnectPolicy,
}

impl StreamableHttpClientConfig {
    /// Config pointing at an endpoint URL, with defaults everywhere else.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            auth_token: None,
            protocol_version: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Depth of the inbound frame channel shared by all streams.
const INBOUND_QUEUE_DEPTH: usize = 256;

struct ClientShared {
    config: StreamableHttpClientConfig,
    http: reqwest::Client,
    state: Mutex<TransportState>,
    session_id: RwLock<Option<String>>,
    last_event_id: RwLock<Option<String>>,
    inbound_tx: mpsc::Sender<Bytes>,
}

/// Streamable HTTP transport for MCP clients.
pub struct StreamableHttpClientTransport {
    shared: Arc<ClientShared>,
    inbound_rx: TokioMutex<Option<mpsc::Receiver<Bytes>>>,
    standalone_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamableHttpClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpClientTransport")
            .field("url", &self.shared.config.url)
            .field("session_id", &*self.shared.session_id.read())
            .finish_non_exhaustive()
    }
}

impl StreamableHttpClientTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn new(config: StreamableHttpClientConfig) -> TransportResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                http,
                state: Mutex::new(TransportState::Disconnected),
                session_id: RwLock::new(None),
                last_event_id: RwLock::new(None),
                inbound_tx,
            }),
            inbound_rx: TokioMutex::new(Some(inbound_rx)),
            standalone_task: Mutex::new(None),
        })
    }

    /// The session id issued by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.read().clone()
    }

    /// Open the standalone GET stream once the session id is known.
    fn ensure_standalone_stream(&self) {
        let mut task = self.standalone_task.lock();
        if task.is_some() || self.shared.session_id.read().is_none() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(standalone_loop(shared)));
    }
}

impl ClientShared {
    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, &self.config.url);
        if let Some(session) = self.session_id.read().as_deref() {
            builder = builder.header("mcp-session-id", session);
        }
        if let Some(version) = &self.config.protocol_version {
            builder = builder.header("mcp-protocol-version", version);
        }
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn capture_session_id(&self, response: &reqwest::Response) {
        let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let mut slot = self.session_id.write();
        if slot.as_deref() != Some(session) {
            debug!(session, "session id assigned");
            *slot = Some(session.to_string());
        }
    }

    /// Forward one SSE event: remember its id, deliver non-empty payloads.
    async fn deliver_event(&self, event: crate::sse::SseEvent) -> TransportResult<()> {
        if let Some(id) = event.id {
            *self.last_event_id.write() = Some(id);
        }
        if event.data.trim().is_empty() {
            trace!("skipping empty SSE event");
            return Ok(());
        }
        self.inbound_tx
            .send(Bytes::from(event.data))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Drain a POST's SSE body, forwarding each event in order.
    async fn pump_sse_body(&self, response: reqwest::Response) -> TransportResult<()> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            for event in parser.feed(&chunk) {
                self.deliver_event(event).await?;
            }
        }
        Ok(())
    }
}

/// Standalone GET stream with reconnect and `Last-Event-ID` resumption.
async fn standalone_loop(shared: Arc<ClientShared>) {
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let Some(delay) = shared.config.reconnect.delay(attempt - 1) else {
                warn!("standalone stream reconnect attempts exhausted");
                return;
            };
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        let mut request = shared
            .request(reqwest::Method::GET)
            .header(header::ACCEPT, "text/event-stream");
        if let Some(last) = shared.last_event_id.read().as_deref() {
            request = request.header("last-event-id", last);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "standalone stream connect failed");
                continue;
            }
        };
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Session terminated server-side; nothing to reconnect to.
            debug!("standalone stream: session gone");
            return;
        }
        if status == reqwest::StatusCode::CONFLICT {
            // The server still counts a dead predecessor as open; back off
            // and retry.
            debug!("standalone stream: conflict, retrying");
            continue;
        }
        if !status.is_success() {
            debug!(%status, "standalone stream rejected");
            continue;
        }

        debug!("standalone stream open");
        attempt = 1;
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    for event in parser.feed(&chunk) {
                        if shared.deliver_event(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(err)) => {
                    debug!(error = %err, "standalone stream error");
                    break;
                }
                None => {
                    debug!("standalone stream ended");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpClientTransport {
    async fn connect(&self) -> TransportResult<()> {
        *self.shared.state.lock() = TransportState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        *self.shared.state.lock() = TransportState::Disconnected;
        if let Some(task) = self.standalone_task.lock().take() {
            task.abort();
        }
        // Best-effort session termination.
        if self.shared.session_id.read().is_some() {
            let _ = self.shared.request(reqwest::Method::DELETE).send().await;
        }
        *self.inbound_rx.lock().await = None;
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.is_connected().await {
            return Err(TransportError::Closed);
        }

        let response = self
            .shared
            .request(reqwest::Method::POST)
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(frame.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.shared.capture_session_id(&response);
        self.ensure_standalone_stream();

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            // Unknown or expired session: the connection is over.
            return Err(TransportError::Closed);
        }
        if !status.is_success() {
            return Err(TransportError::SendFailed(format!(
                "POST returned {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type.contains("text/event-stream") {
            // Responses ride the POST's own SSE stream; drain it so they
            // land in arrival order.
            self.shared.pump_sse_body(response).await
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            if body.is_empty() {
                return Ok(());
            }
            self.shared
                .inbound_tx
                .send(body)
                .await
                .map_err(|_| TransportError::Closed)
        }
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    async fn state(&self) -> TransportState {
        self.shared.state.lock().clone()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.shared.config.url.clone())
    }
}
