//! Core protocol types shared by requests, notifications, and session state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capabilities::{ClientCapabilities, ServerCapabilities};

/// JSON-RPC request identifier.
///
/// Ids are either strings or non-fractional numbers. Equality and hashing are
/// type-tagged: `RequestId::from("1") != RequestId::from(1)`. Peers that
/// stringify numeric ids are answered with the stringified form they sent;
/// the two spaces are never cross-canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier
    String(String),
    /// Integer identifier (fractional JSON numbers are rejected at decode)
    Number(i64),
}

impl RequestId {
    /// Returns the string form if this is a string id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Returns the numeric form if this is a numeric id.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::String(_) => None,
            Self::Number(n) => Some(*n),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Name and version of an MCP implementation, exchanged during initialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Implementation {
    /// Machine-readable implementation name
    pub name: String,
    /// Optional human-readable display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Implementation version string
    pub version: String,
}

impl Implementation {
    /// Create an implementation descriptor from name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            version: version.into(),
        }
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client wants to speak
    pub protocol_version: String,
    /// Capabilities the client advertises
    pub capabilities: ClientCapabilities,
    /// Client implementation info
    pub client_info: Implementation,
    /// Request metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server selected
    pub protocol_version: String,
    /// Capabilities the server advertises
    pub capabilities: ServerCapabilities,
    /// Server implementation info
    pub server_info: Implementation,
    /// Optional usage instructions for the client's LLM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Result metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Parameters of `notifications/cancelled`.
///
/// `request_id` is optional since protocol version 2025-11-25 (general
/// cancellation); earlier peers always set it. A cancellation naming an
/// unknown id is a no-op for the receiver.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// Id of the request being cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Optional human-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Token correlating progress notifications with the originating request.
pub type ProgressToken = RequestId;

/// Parameters of `notifications/progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token from the originating request's `_meta.progressToken`
    pub progress_token: ProgressToken,
    /// Progress so far; monotonically increasing
    pub progress: f64,
    /// Total expected work, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Optional status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Severity level for `notifications/message`, mirroring syslog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Detailed debugging information
    Debug,
    /// Routine operational messages
    Info,
    /// Normal but significant events
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System unusable
    Emergency,
}

/// Parameters of `notifications/message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    /// Severity of the message
    pub level: LoggingLevel,
    /// Optional logger name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary JSON payload
    pub data: Value,
}

/// Parameters of `logging/setLevel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLevelParams {
    /// Minimum level the peer should emit from now on
    pub level: LoggingLevel,
}

/// Parameters of `notifications/resources/updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUpdatedParams {
    /// URI of the resource that changed
    pub uri: String,
}

/// An empty result object, used by `ping` and the fire-and-forget requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResult {
    /// Result metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Helpers for reading the `_meta` object carried inside request params.
///
/// `_meta` round-trips opaquely; these accessors pull out the keys the core
/// itself reacts to.
pub mod meta {
    use super::{RequestId, Value};

    /// Vendor key carrying the task association for a request.
    pub const RELATED_TASK_KEY: &str = "io.modelcontextprotocol/related-task";

    /// Extract the `_meta` object from a params value, if present.
    pub fn of_params(params: Option<&Value>) -> Option<&Value> {
        params?.get("_meta")
    }

    /// Extract `_meta.progressToken`.
    pub fn progress_token(meta: &Value) -> Option<RequestId> {
        let token = meta.get("progressToken")?;
        serde_json::from_value(token.clone()).ok()
    }

    /// Extract `_meta["io.modelcontextprotocol/related-task"].taskId`.
    pub fn related_task_id(meta: &Value) -> Option<&str> {
        meta.get(RELATED_TASK_KEY)?.get("taskId")?.as_str()
    }
}

/// Experimental capability bag used on both sides of the handshake.
pub type ExperimentalCapabilities = HashMap<String, Value>;
