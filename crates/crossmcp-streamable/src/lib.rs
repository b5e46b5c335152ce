//! # crossmcp Streamable HTTP
//!
//! The Streamable HTTP transport engine: maps MCP's JSON-RPC flows onto a
//! single HTTP endpoint with Server-Sent Events.
//!
//! - **Sessions**: stateful mode issues `Mcp-Session-Id` at initialize and
//!   validates it on every later request; sessions die on DELETE or idle TTL.
//! - **Streams**: each request-bearing POST opens its own SSE response
//!   stream; one standalone GET stream per session carries server-initiated
//!   messages.
//! - **Resumability**: with an [`EventStore`] configured, events carry ids
//!   and `Last-Event-ID` replays missed events; priming events give clients
//!   an anchor before the first message (protocol ≥ 2025-11-25).
//! - **Security**: a DNS-rebinding guard rejects non-allowlisted `Host`
//!   values with 421.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossmcp_server::Server;
//! use crossmcp_streamable::{StreamableHttpConfigBuilder, StreamableHttpEngine};
//!
//! # async fn example() {
//! let server = Arc::new(Server::builder().name("demo").with_tools().build());
//! let config = StreamableHttpConfigBuilder::new()
//!     .with_endpoint_path("/mcp")
//!     .build();
//! let engine = StreamableHttpEngine::new(server, config);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, engine.router()).await.unwrap();
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod config;
mod engine;
pub mod event_store;
pub mod sse;
mod stream;

pub use client::{ReconnectPolicy, StreamableHttpClientConfig, StreamableHttpClientTransport};
pub use config::{
    HostPolicy, SessionIdGenerator, StreamableHttpConfig, StreamableHttpConfigBuilder,
};
pub use engine::StreamableHttpEngine;
pub use event_store::{EventStore, InMemoryEventStore, ReplaySet, StoredEvent};
