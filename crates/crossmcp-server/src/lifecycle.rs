//! Per-connection initialize lifecycle and post-initialize gating.
//!
//! The initialize exchange runs: client sends `initialize`, the server picks
//! the protocol version and replies, the client confirms with
//! `notifications/initialized`. Until that confirmation arrives, every
//! non-handshake request is rejected. A second `initialize` on the same
//! connection is an invalid request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crossmcp_core::{RequestContext, RequestHandler};
use crossmcp_protocol::capabilities::PeerCapabilities;
use crossmcp_protocol::types::{Implementation, InitializeParams, InitializeResult};
use crossmcp_protocol::{methods, version, McpError, McpResult, ServerCapabilities};

/// Handshake state of one connection.
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    initialize_received: AtomicBool,
    ready: AtomicBool,
}

impl ConnectionState {
    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Methods legal before `notifications/initialized`.
pub(crate) fn is_handshake_method(method: &str) -> bool {
    matches!(method, methods::INITIALIZE | methods::PING)
}

/// Wraps a user handler, rejecting calls that arrive before the handshake
/// completed.
pub(crate) struct GatedHandler {
    pub(crate) state: Arc<ConnectionState>,
    pub(crate) method: String,
    pub(crate) inner: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for GatedHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        if !self.state.is_ready() && !is_handshake_method(&self.method) {
            return Err(McpError::InvalidRequest(format!(
                "method '{}' before initialization completed",
                self.method
            )));
        }
        self.inner.handle(params, ctx).await
    }
}

/// Answers the `initialize` request: version selection, capability exchange,
/// double-initialize rejection.
pub(crate) struct InitializeHandler {
    pub(crate) state: Arc<ConnectionState>,
    pub(crate) info: Implementation,
    pub(crate) capabilities: ServerCapabilities,
    pub(crate) instructions: Option<String>,
}

#[async_trait]
impl RequestHandler for InitializeHandler {
    async fn handle(&self, params: Option<Value>, ctx: RequestContext) -> McpResult<Value> {
        if self.state.initialize_received.swap(true, Ordering::SeqCst) {
            return Err(McpError::InvalidRequest(
                "initialize already received on this session".to_string(),
            ));
        }

        let params: InitializeParams =
            serde_json::from_value(params.unwrap_or(Value::Null))
                .map_err(|e| McpError::invalid_params(format!("initialize params: {e}")))?;

        let negotiated = version::negotiate(&params.protocol_version);
        debug!(
            client = %params.client_info.name,
            requested = %params.protocol_version,
            negotiated,
            "initialize"
        );

        let peer = ctx.peer();
        peer.set_negotiated_version(negotiated);
        peer.set_peer_info(params.client_info);
        peer.set_peer_capabilities(PeerCapabilities::Client(params.capabilities));

        let result = InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
            meta: None,
        };
        Ok(serde_json::to_value(&result)?)
    }
}
