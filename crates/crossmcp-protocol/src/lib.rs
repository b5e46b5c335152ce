//! # crossmcp Protocol
//!
//! Wire-level types for the Model Context Protocol: a JSON-RPC 2.0 codec with
//! batching, request identifiers, capability sets, protocol version ordering,
//! and the MCP error-code table.
//!
//! This crate is transport-agnostic and runtime-agnostic. Higher layers
//! (`crossmcp-core`, `crossmcp-streamable`) consume these types; nothing here
//! performs I/O.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod capabilities;
pub mod error;
pub mod jsonrpc;
pub mod types;
pub mod version;

pub use capabilities::{ClientCapabilities, ServerCapabilities};
pub use error::{McpError, McpResult, ProtocolError};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, JsonRpcVersion, ResponseId, JSONRPC_VERSION,
};
pub use types::{Implementation, RequestId};
pub use version::{LATEST_VERSION, SUPPORTED_VERSIONS};

/// Maximum accepted message size in bytes (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Protocol request method names
pub mod methods {
    /// Initialize handshake
    pub const INITIALIZE: &str = "initialize";
    /// Liveness probe, answerable by either peer
    pub const PING: &str = "ping";
    /// List available tools
    pub const LIST_TOOLS: &str = "tools/list";
    /// Invoke a tool
    pub const CALL_TOOL: &str = "tools/call";
    /// List available prompts
    pub const LIST_PROMPTS: &str = "prompts/list";
    /// Fetch a prompt
    pub const GET_PROMPT: &str = "prompts/get";
    /// List available resources
    pub const LIST_RESOURCES: &str = "resources/list";
    /// Read a resource
    pub const READ_RESOURCE: &str = "resources/read";
    /// Subscribe to resource updates
    pub const SUBSCRIBE: &str = "resources/subscribe";
    /// Unsubscribe from resource updates
    pub const UNSUBSCRIBE: &str = "resources/unsubscribe";
    /// Argument completion
    pub const COMPLETE: &str = "completion/complete";
    /// Set the peer's logging level
    pub const SET_LEVEL: &str = "logging/setLevel";
    /// Server-initiated LLM sampling
    pub const CREATE_MESSAGE: &str = "sampling/createMessage";
    /// Server-initiated user input request
    pub const ELICIT: &str = "elicitation/create";
    /// List client filesystem roots
    pub const LIST_ROOTS: &str = "roots/list";
}

/// Protocol notification method names
pub mod notifications {
    /// Client confirmation that initialization completed
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Request cancellation
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress update for a long-running request
    pub const PROGRESS: &str = "notifications/progress";
    /// Log message from the server
    pub const MESSAGE: &str = "notifications/message";
    /// A subscribed resource changed
    pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
    /// The resource list changed
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    /// The tool list changed
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    /// The prompt list changed
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    /// The client root set changed
    pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
}
