//! # crossmcp Core
//!
//! The bidirectional dispatch engine at the heart of every MCP connection.
//!
//! A [`Peer`] multiplexes requests, responses, and notifications over one
//! duplex transport: it assigns outbound request ids, parks callers awaiting
//! responses, routes inbound messages to registered handlers, and enforces
//! per-request timeouts, cancellation, and shutdown semantics. Both the
//! client and the server side of a connection are a `Peer`; only the
//! lifecycle layers (`crossmcp-client`, `crossmcp-server`) differ.
//!
//! Handlers receive a [`RequestContext`] with the request's metadata and an
//! explicit dispatcher handle, so server handlers can call back into the
//! client (sampling, elicitation, roots) while their own request is still in
//! flight.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod context;
pub mod dispatcher;
pub mod registry;

pub use context::{AuthInfo, RequestContext, RequestInfo};
pub use dispatcher::{Peer, RequestOptions};
pub use registry::{
    notification_handler, request_handler, HandlerRegistry, ListenerHandle, NotificationHandler,
    RequestHandler,
};
