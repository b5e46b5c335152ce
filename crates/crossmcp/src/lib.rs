//! # crossmcp
//!
//! A bidirectional implementation of the Model Context Protocol (MCP): the
//! JSON-RPC 2.0 protocol spoken between LLM host applications and
//! tool/resource providers.
//!
//! The workspace splits along the protocol's natural seams; this crate
//! re-exports the pieces:
//!
//! | Crate | What lives there |
//! |-------|------------------|
//! | [`protocol`] | Wire codec, request ids, capabilities, versions, error codes |
//! | [`transport`] | The `Transport` trait, stdio and in-memory transports |
//! | [`core`] | The per-peer dispatcher, handler registry, request context |
//! | [`client`] | Client session lifecycle and convenience requests |
//! | [`server`] | Server lifecycle, handler installation, broadcasts |
//! | [`streamable`] | The Streamable HTTP engine (sessions, SSE, resumability) |
//!
//! ## A server over stdio
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use crossmcp::core::request_handler;
//! use crossmcp::server::Server;
//! use crossmcp::transport::StdioTransport;
//!
//! # async fn example() -> crossmcp::protocol::McpResult<()> {
//! let server = Server::builder()
//!     .name("echo")
//!     .version("1.0.0")
//!     .with_tools()
//!     .build();
//! server.on_request("tools/call", request_handler(|params, ctx| async move {
//!     ctx.send_progress(1.0, Some(1.0), None).await?;
//!     Ok(json!({"content": [{"type": "text", "text": params.unwrap_or_default().to_string()}]}))
//! }));
//! let connection = server.serve(Arc::new(StdioTransport::new())).await?;
//! # let _ = connection;
//! # Ok(())
//! # }
//! ```
//!
//! ## A client
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossmcp::client::Client;
//! use crossmcp::transport::StdioTransport;
//!
//! # async fn example() -> crossmcp::protocol::McpResult<()> {
//! let client = Client::new(Arc::new(StdioTransport::new()));
//! let init = client.initialize().await?;
//! println!("server: {} ({})", init.server_info.name, init.protocol_version);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub use crossmcp_client as client;
pub use crossmcp_core as core;
pub use crossmcp_protocol as protocol;
pub use crossmcp_server as server;
pub use crossmcp_streamable as streamable;
pub use crossmcp_transport as transport;

/// The commonly needed surface in one import.
pub mod prelude {
    pub use crossmcp_client::Client;
    pub use crossmcp_core::{
        notification_handler, request_handler, Peer, RequestContext, RequestOptions,
    };
    pub use crossmcp_protocol::{
        methods, notifications, ClientCapabilities, Implementation, McpError, McpResult,
        RequestId, ServerCapabilities,
    };
    pub use crossmcp_server::Server;
    pub use crossmcp_streamable::{StreamableHttpConfigBuilder, StreamableHttpEngine};
    pub use crossmcp_transport::{InMemoryTransport, StdioTransport, Transport};
}
