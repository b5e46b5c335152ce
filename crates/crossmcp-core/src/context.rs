//! Per-request handler context.
//!
//! Every request handler receives a [`RequestContext`] carrying the request's
//! identity and metadata plus an explicit handle back to the dispatcher for
//! outbound traffic (notifications, progress, and the server→client
//! convenience requests). Passing the handle explicitly keeps handlers free
//! of captured back-references to the session.

use std::collections::HashMap;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crossmcp_protocol::types::{meta, ProgressParams};
use crossmcp_protocol::{methods, notifications, JsonRpcMessage, McpResult, RequestId};

use crate::dispatcher::{Peer, RequestOptions};

/// Authentication information attached by transports that carry it.
///
/// The core never verifies tokens; this is the verified shape handed over by
/// an authenticating transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    /// The bearer token as presented
    pub token: String,
    /// OAuth client id, if known
    pub client_id: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Expiry as a Unix timestamp in seconds, if known
    pub expires_at: Option<u64>,
}

/// Transport-level request information (HTTP headers, when applicable).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Header map as received, lowercase names
    pub headers: HashMap<String, String>,
}

/// Context passed to request handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    meta: Option<Value>,
    auth: Option<AuthInfo>,
    request_info: Option<RequestInfo>,
    cancellation: CancellationToken,
    peer: Peer,
}

impl RequestContext {
    pub(crate) fn new(
        request_id: RequestId,
        meta: Option<Value>,
        cancellation: CancellationToken,
        peer: Peer,
    ) -> Self {
        Self {
            request_id,
            meta,
            auth: peer.auth_info(),
            request_info: peer.request_info(),
            cancellation,
            peer,
        }
    }

    /// Id of the request being handled.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The request's `_meta` object, if it carried one.
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// `_meta.progressToken`, if present.
    pub fn progress_token(&self) -> Option<RequestId> {
        self.meta.as_ref().and_then(meta::progress_token)
    }

    /// Task id from the `io.modelcontextprotocol/related-task` meta key.
    pub fn related_task_id(&self) -> Option<String> {
        self.meta
            .as_ref()
            .and_then(meta::related_task_id)
            .map(str::to_string)
    }

    /// Authentication info, populated only by authenticating transports.
    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.auth.as_ref()
    }

    /// Transport request info (HTTP headers), when applicable.
    pub fn request_info(&self) -> Option<&RequestInfo> {
        self.request_info.as_ref()
    }

    /// The dispatcher handle for this connection.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// True once this request has been cancelled; the handler should stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when this request is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Send a notification to the peer.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.peer.send_notification(method, params).await
    }

    /// Send an arbitrary JSON-RPC message over this connection.
    pub async fn send_message(&self, message: JsonRpcMessage) -> McpResult<()> {
        self.peer.send_raw(message).await
    }

    /// Emit `notifications/progress` keyed by this request's progress token.
    /// No-op when the request carried no token.
    pub async fn send_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> McpResult<()> {
        let Some(progress_token) = self.progress_token() else {
            return Ok(());
        };
        let params = ProgressParams {
            progress_token,
            progress,
            total,
            message,
        };
        self.peer
            .send_notification(notifications::PROGRESS, Some(serde_json::to_value(&params)?))
            .await
    }

    /// Ask the client for user input (`elicitation/create`).
    pub async fn elicit(&self, params: Value) -> McpResult<Value> {
        self.relayed_request(methods::ELICIT, Some(params)).await
    }

    /// Ask the client's LLM for a completion (`sampling/createMessage`).
    pub async fn sample(&self, params: Value) -> McpResult<Value> {
        self.relayed_request(methods::CREATE_MESSAGE, Some(params))
            .await
    }

    /// List the client's filesystem roots (`roots/list`).
    pub async fn list_roots(&self) -> McpResult<Value> {
        self.relayed_request(methods::LIST_ROOTS, None).await
    }

    /// Send a request back to the peer, tagging it with this request's task
    /// association so the client can correlate.
    async fn relayed_request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let params = match (params, self.related_task_id()) {
            (Some(mut p), Some(task_id)) => {
                if let Some(obj) = p.as_object_mut() {
                    obj.entry("_meta").or_insert_with(|| json!({}));
                    if let Some(m) = obj.get_mut("_meta").and_then(Value::as_object_mut) {
                        m.insert(
                            meta::RELATED_TASK_KEY.to_string(),
                            json!({ "taskId": task_id }),
                        );
                    }
                }
                Some(p)
            }
            (p, _) => p,
        };
        self.peer
            .send_request(method, params, RequestOptions::default())
            .await
    }
}
