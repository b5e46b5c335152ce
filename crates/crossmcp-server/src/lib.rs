//! # crossmcp Server
//!
//! The server side of MCP connections: a [`Server`] carries the
//! implementation info, advertised capabilities, and request handlers, and
//! [`Server::serve`] binds them to one transport connection with the full
//! initialize lifecycle installed.
//!
//! A single `Server` can serve many connections (each gets its own
//! dispatcher); list-changed broadcasts fan out to every live connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use crossmcp_core::request_handler;
//! use crossmcp_server::Server;
//! use crossmcp_transport::StdioTransport;
//!
//! # async fn example() -> crossmcp_protocol::McpResult<()> {
//! let server = Server::builder()
//!     .name("demo")
//!     .version("1.0.0")
//!     .with_tools()
//!     .build();
//! server.on_request("tools/list", request_handler(|_, _| async {
//!     Ok(json!({"tools": []}))
//! }));
//! server.serve(Arc::new(StdioTransport::new())).await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod lifecycle;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crossmcp_core::{notification_handler, request_handler, Peer, RequestHandler};
use crossmcp_protocol::types::{Implementation, LoggingLevel, LoggingMessageParams};
use crossmcp_protocol::{methods, notifications, McpResult, ServerCapabilities};
use crossmcp_transport::Transport;

use lifecycle::{ConnectionState, GatedHandler, InitializeHandler};

/// An MCP server: identity, capabilities, and handler set, servable over any
/// number of transport connections.
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    handlers: DashMap<String, Arc<dyn RequestHandler>>,
    connections: RwLock<Vec<Peer>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.inner.info.name)
            .field("handlers", &self.inner.handlers.len())
            .field("connections", &self.inner.connections.read().len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Start building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Register (or replace) a request handler. Affects connections opened
    /// after this call.
    pub fn on_request(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.inner.handlers.insert(method.into(), handler);
    }

    /// Serve one transport connection: installs the handler set behind the
    /// initialize gate, starts the dispatcher, and tracks the connection for
    /// broadcasts.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> McpResult<Peer> {
        let peer = Peer::new(transport);
        let state = Arc::new(ConnectionState::default());

        for entry in self.inner.handlers.iter() {
            peer.on_request(
                entry.key().clone(),
                Arc::new(GatedHandler {
                    state: Arc::clone(&state),
                    method: entry.key().clone(),
                    inner: Arc::clone(entry.value()),
                }),
            );
        }

        peer.on_request(
            methods::INITIALIZE,
            Arc::new(InitializeHandler {
                state: Arc::clone(&state),
                info: self.inner.info.clone(),
                capabilities: self.inner.capabilities.clone(),
                instructions: self.inner.instructions.clone(),
            }),
        );
        // Ping needs no registration and no handshake.
        peer.on_request(
            methods::PING,
            request_handler(|_, _| async { Ok(json!({})) }),
        );

        let ready_state = Arc::clone(&state);
        peer.on_notification(
            notifications::INITIALIZED,
            notification_handler(move |_| {
                let state = Arc::clone(&ready_state);
                async move {
                    debug!("client confirmed initialization");
                    state.mark_ready();
                    Ok(())
                }
            }),
        )
        .forget();

        peer.start().await?;
        self.inner.connections.write().push(peer.clone());
        Ok(peer)
    }

    /// Number of tracked (possibly closed) connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Send a notification to every live connection; failed or closed
    /// connections are dropped from the active set.
    pub async fn notify_all(&self, method: &str, params: Option<Value>) {
        let peers: Vec<Peer> = self.inner.connections.read().clone();
        let mut dead = Vec::new();
        for (index, peer) in peers.iter().enumerate() {
            if peer.is_closed() {
                dead.push(index);
                continue;
            }
            if let Err(err) = peer.send_notification(method, params.clone()).await {
                warn!(method, error = %err, "broadcast failed; dropping connection");
                dead.push(index);
            }
        }
        if !dead.is_empty() {
            let mut connections = self.inner.connections.write();
            connections.retain(|peer| !peer.is_closed());
        }
    }

    /// Broadcast `notifications/tools/list_changed`.
    pub async fn notify_tools_list_changed(&self) {
        self.notify_all(notifications::TOOLS_LIST_CHANGED, None).await;
    }

    /// Broadcast `notifications/resources/list_changed`.
    pub async fn notify_resources_list_changed(&self) {
        self.notify_all(notifications::RESOURCES_LIST_CHANGED, None)
            .await;
    }

    /// Broadcast `notifications/prompts/list_changed`.
    pub async fn notify_prompts_list_changed(&self) {
        self.notify_all(notifications::PROMPTS_LIST_CHANGED, None)
            .await;
    }

    /// Emit `notifications/message` on one connection.
    pub async fn log_to(
        &self,
        peer: &Peer,
        level: LoggingLevel,
        logger: Option<String>,
        data: Value,
    ) -> McpResult<()> {
        let params = LoggingMessageParams {
            level,
            logger,
            data,
        };
        peer.send_notification(notifications::MESSAGE, Some(serde_json::to_value(&params)?))
            .await
    }
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    name: Option<String>,
    title: Option<String>,
    version: Option<String>,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
}

impl ServerBuilder {
    /// Machine-readable server name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Human-readable display name.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Server version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Advertise the `tools` capability.
    pub fn with_tools(mut self) -> Self {
        self.capabilities = self.capabilities.with_tools();
        self
    }

    /// Advertise the `resources` capability.
    pub fn with_resources(mut self) -> Self {
        self.capabilities = self.capabilities.with_resources();
        self
    }

    /// Advertise the `prompts` capability.
    pub fn with_prompts(mut self) -> Self {
        self.capabilities = self.capabilities.with_prompts();
        self
    }

    /// Advertise the `logging` capability.
    pub fn with_logging(mut self) -> Self {
        self.capabilities = self.capabilities.with_logging();
        self
    }

    /// Advertise the `completions` capability.
    pub fn with_completions(mut self) -> Self {
        self.capabilities = self.capabilities.with_completions();
        self
    }

    /// Replace the whole capability set.
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Usage instructions returned from initialize.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                info: Implementation {
                    name: self.name.unwrap_or_else(|| "crossmcp-server".to_string()),
                    title: self.title,
                    version: self
                        .version
                        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
                },
                capabilities: self.capabilities,
                instructions: self.instructions,
                handlers: DashMap::new(),
                connections: RwLock::new(Vec::new()),
            }),
        }
    }
}
