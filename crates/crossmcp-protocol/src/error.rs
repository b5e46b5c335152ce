//! Protocol error types and the MCP error-code table.

use serde_json::{json, Value};
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;

/// Result alias for protocol-level operations.
pub type McpResult<T> = Result<T, McpError>;

/// JSON-RPC and MCP error codes.
pub mod codes {
    /// Parse error: invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request: the JSON is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Resource not found; `data` carries `{uri}`
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
    /// Connection closed; never sent on the wire, surfaced locally
    pub const CONNECTION_CLOSED: i32 = -32001;
    /// Request timed out; `data` carries `{timeoutMs}`
    pub const REQUEST_TIMEOUT: i32 = -32000;
    /// Request cancelled; the message carries the reason
    pub const REQUEST_CANCELLED: i32 = -32800;
    /// Inclusive bounds of the server-defined custom error range
    pub const SERVER_ERROR_RANGE: (i32, i32) = (-32099, -32050);
}

/// Failure decoding a frame. Maps onto the two JSON-RPC decode error codes.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The bytes were not valid JSON (−32700)
    #[error("parse error: {0}")]
    InvalidJson(String),
    /// The JSON was not a valid JSON-RPC frame (−32600)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProtocolError {
    /// The JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidJson(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
        }
    }

    /// Convert into a wire error object.
    pub fn to_wire(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: match self {
                Self::InvalidJson(_) => "Parse error".to_string(),
                Self::InvalidRequest(detail) => format!("Invalid Request: {detail}"),
            },
            data: None,
        }
    }
}

/// Error surfaced by protocol operations: either a typed local failure or an
/// error object received from the peer.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Peer sent JSON that failed to parse
    #[error("parse error: {0}")]
    Parse(String),
    /// Structurally invalid request
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No handler registered for the method, or peer lacks the capability
    #[error("method not found: {0}")]
    MethodNotFound(String),
    /// Parameters failed validation or deserialization
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Internal failure while handling a request
    #[error("internal error: {0}")]
    Internal(String),
    /// The named resource does not exist
    #[error("resource not found: {uri}")]
    ResourceNotFound {
        /// URI of the missing resource
        uri: String,
    },
    /// The underlying connection is closed; pending requests fail with this
    #[error("connection closed")]
    ConnectionClosed,
    /// The request did not complete within its timeout
    #[error("request timed out after {timeout_ms} ms")]
    RequestTimeout {
        /// Configured timeout, in milliseconds
        timeout_ms: u64,
    },
    /// The request was cancelled before completion
    #[error("request cancelled: {reason}")]
    RequestCancelled {
        /// Why the request was cancelled
        reason: String,
    },
    /// An error object from the peer that maps to no local variant
    #[error("{message} (code {code})")]
    Rpc {
        /// Wire error code
        code: i32,
        /// Wire error message
        message: String,
        /// Optional wire error data
        data: Option<Value>,
    },
}

impl McpError {
    /// Method-not-found error for the given method name.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound(method.into())
    }

    /// Invalid-params error with detail.
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::InvalidParams(detail.into())
    }

    /// Internal error with detail.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// Resource-not-found error for a URI.
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound { uri: uri.into() }
    }

    /// Cancellation error; `reason` defaults to `"cancelled"`.
    pub fn cancelled(reason: Option<String>) -> Self {
        Self::RequestCancelled {
            reason: reason.unwrap_or_else(|| "cancelled".to_string()),
        }
    }

    /// The wire code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Internal(_) => codes::INTERNAL_ERROR,
            Self::ResourceNotFound { .. } => codes::RESOURCE_NOT_FOUND,
            Self::ConnectionClosed => codes::CONNECTION_CLOSED,
            Self::RequestTimeout { .. } => codes::REQUEST_TIMEOUT,
            Self::RequestCancelled { .. } => codes::REQUEST_CANCELLED,
            Self::Rpc { code, .. } => *code,
        }
    }

    /// Convert into a wire error object, attaching the structured `data` the
    /// code table requires.
    pub fn to_wire(&self) -> JsonRpcError {
        let data = match self {
            Self::ResourceNotFound { uri } => Some(json!({ "uri": uri })),
            Self::RequestTimeout { timeout_ms } => Some(json!({ "timeoutMs": timeout_ms })),
            Self::Rpc { data, .. } => data.clone(),
            _ => None,
        };
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }

    /// Reconstruct from a wire error object, recovering typed variants for
    /// the codes this crate defines.
    pub fn from_wire(error: JsonRpcError) -> Self {
        match error.code {
            codes::METHOD_NOT_FOUND => Self::MethodNotFound(error.message),
            codes::INVALID_PARAMS => Self::InvalidParams(error.message),
            codes::INTERNAL_ERROR => Self::Internal(error.message),
            codes::CONNECTION_CLOSED => Self::ConnectionClosed,
            codes::RESOURCE_NOT_FOUND => {
                let uri = error
                    .data
                    .as_ref()
                    .and_then(|d| d.get("uri"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::ResourceNotFound { uri }
            }
            codes::REQUEST_TIMEOUT => {
                let timeout_ms = error
                    .data
                    .as_ref()
                    .and_then(|d| d.get("timeoutMs"))
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                Self::RequestTimeout { timeout_ms }
            }
            codes::REQUEST_CANCELLED => Self::RequestCancelled {
                reason: error.message,
            },
            code => Self::Rpc {
                code,
                message: error.message,
                data: error.data,
            },
        }
    }
}

impl From<ProtocolError> for McpError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidJson(detail) => Self::Parse(detail),
            ProtocolError::InvalidRequest(detail) => Self::InvalidRequest(detail),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}
