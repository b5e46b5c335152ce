//! # crossmcp Client
//!
//! The client side of an MCP connection: opens the initialize handshake,
//! validates the server's version choice, confirms with
//! `notifications/initialized`, and then exposes the negotiated session.
//!
//! Requests whose payload schemas live outside the protocol core (tools,
//! prompts, resources, completion) pass `serde_json::Value` through; typed
//! layers can wrap [`Client::request`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossmcp_client::Client;
//! use crossmcp_transport::StdioTransport;
//!
//! # async fn example() -> crossmcp_protocol::McpResult<()> {
//! let client = Client::new(Arc::new(StdioTransport::new()));
//! let init = client.initialize().await?;
//! println!("connected to {}", init.server_info.name);
//! let tools = client.list_tools(None).await?;
//! # let _ = tools;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crossmcp_core::{ListenerHandle, NotificationHandler, Peer, RequestHandler, RequestOptions};
use crossmcp_protocol::capabilities::PeerCapabilities;
use crossmcp_protocol::types::{
    Implementation, InitializeParams, InitializeResult, LoggingLevel, SetLevelParams,
};
use crossmcp_protocol::{
    methods, notifications, version, ClientCapabilities, McpError, McpResult,
};
use crossmcp_transport::Transport;

/// An MCP client session over one transport.
#[derive(Debug)]
pub struct Client {
    peer: Peer,
    info: Implementation,
    capabilities: ClientCapabilities,
    initialized: AtomicBool,
}

impl Client {
    /// Create a client with default capabilities.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_capabilities(transport, ClientCapabilities::default())
    }

    /// Create a client advertising the given capabilities.
    pub fn with_capabilities(
        transport: Arc<dyn Transport>,
        capabilities: ClientCapabilities,
    ) -> Self {
        Self {
            peer: Peer::new(transport),
            info: Implementation::new("crossmcp-client", env!("CARGO_PKG_VERSION")),
            capabilities,
            initialized: AtomicBool::new(false),
        }
    }

    /// Override the implementation info sent during initialize.
    pub fn set_info(&mut self, info: Implementation) {
        self.info = info;
    }

    /// Enable strict mode: requests the server has not advertised a
    /// capability for fail locally with `method not found` instead of
    /// touching the wire.
    pub fn set_strict(&self, strict: bool) {
        self.peer.set_strict(strict);
    }

    /// The underlying dispatcher.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Perform the initialize handshake.
    ///
    /// Sends `initialize`, verifies the server's chosen protocol version is
    /// one this client speaks (aborting the session otherwise), records the
    /// negotiated state, and confirms with `notifications/initialized`.
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(McpError::InvalidRequest(
                "session already initialized".to_string(),
            ));
        }
        self.peer.start().await?;

        let params = InitializeParams {
            protocol_version: version::LATEST_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.info.clone(),
            meta: None,
        };
        let raw = self
            .peer
            .send_request(
                methods::INITIALIZE,
                Some(serde_json::to_value(&params)?),
                RequestOptions::default(),
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| McpError::invalid_params(format!("malformed initialize result: {e}")))?;

        if !version::is_supported(&result.protocol_version) {
            warn!(
                version = %result.protocol_version,
                "server selected an unsupported protocol version; aborting"
            );
            self.peer.stop().await;
            return Err(McpError::InvalidRequest(format!(
                "server selected unsupported protocol version '{}'",
                result.protocol_version
            )));
        }

        self.peer.set_negotiated_version(&result.protocol_version);
        self.peer.set_peer_info(result.server_info.clone());
        self.peer
            .set_peer_capabilities(PeerCapabilities::Server(result.capabilities.clone()));

        self.peer
            .send_notification(notifications::INITIALIZED, None)
            .await?;
        self.initialized.store(true, Ordering::SeqCst);
        debug!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "session initialized"
        );
        Ok(result)
    }

    /// Close the session, failing anything still in flight.
    pub async fn shutdown(&self) {
        self.peer.stop().await;
    }

    fn ensure_initialized(&self) -> McpResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::InvalidRequest(
                "session not initialized: call initialize() first".to_string(),
            ))
        }
    }

    /// Send any request on the negotiated session.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> McpResult<Value> {
        self.ensure_initialized()?;
        self.peer.send_request(method, params, options).await
    }

    /// Send a notification on the negotiated session.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.ensure_initialized()?;
        self.peer.send_notification(method, params).await
    }

    /// Liveness probe; legal before initialization completes.
    pub async fn ping(&self) -> McpResult<()> {
        self.peer
            .send_request(methods::PING, None, RequestOptions::default())
            .await?;
        Ok(())
    }

    /// `tools/list`, optionally from a pagination cursor.
    pub async fn list_tools(&self, cursor: Option<String>) -> McpResult<Value> {
        self.request(
            methods::LIST_TOOLS,
            cursor.map(|c| json!({ "cursor": c })),
            RequestOptions::default(),
        )
        .await
    }

    /// `tools/call` with JSON arguments.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request(methods::CALL_TOOL, Some(params), RequestOptions::default())
            .await
    }

    /// `prompts/list`.
    pub async fn list_prompts(&self, cursor: Option<String>) -> McpResult<Value> {
        self.request(
            methods::LIST_PROMPTS,
            cursor.map(|c| json!({ "cursor": c })),
            RequestOptions::default(),
        )
        .await
    }

    /// `prompts/get`.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request(methods::GET_PROMPT, Some(params), RequestOptions::default())
            .await
    }

    /// `resources/list`.
    pub async fn list_resources(&self, cursor: Option<String>) -> McpResult<Value> {
        self.request(
            methods::LIST_RESOURCES,
            cursor.map(|c| json!({ "cursor": c })),
            RequestOptions::default(),
        )
        .await
    }

    /// `resources/read`.
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.request(
            methods::READ_RESOURCE,
            Some(json!({ "uri": uri })),
            RequestOptions::default(),
        )
        .await
    }

    /// `resources/subscribe`.
    pub async fn subscribe_resource(&self, uri: &str) -> McpResult<Value> {
        self.request(
            methods::SUBSCRIBE,
            Some(json!({ "uri": uri })),
            RequestOptions::default(),
        )
        .await
    }

    /// `completion/complete`; in strict mode this fails locally unless the
    /// server advertised the `completions` capability.
    pub async fn complete(&self, params: Value) -> McpResult<Value> {
        self.request(methods::COMPLETE, Some(params), RequestOptions::default())
            .await
    }

    /// `logging/setLevel`.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> McpResult<Value> {
        self.request(
            methods::SET_LEVEL,
            Some(serde_json::to_value(&SetLevelParams { level })?),
            RequestOptions::default(),
        )
        .await
    }

    /// Handle server-initiated `sampling/createMessage` requests.
    pub fn on_sampling(&self, handler: Arc<dyn RequestHandler>) {
        self.peer.on_request(methods::CREATE_MESSAGE, handler);
    }

    /// Handle server-initiated `elicitation/create` requests.
    pub fn on_elicitation(&self, handler: Arc<dyn RequestHandler>) {
        self.peer.on_request(methods::ELICIT, handler);
    }

    /// Handle server-initiated `roots/list` requests.
    pub fn on_roots(&self, handler: Arc<dyn RequestHandler>) {
        self.peer.on_request(methods::LIST_ROOTS, handler);
    }

    /// Subscribe to a server notification; drop the handle to unsubscribe.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        listener: Arc<dyn NotificationHandler>,
    ) -> ListenerHandle {
        self.peer.on_notification(method, listener)
    }
}
