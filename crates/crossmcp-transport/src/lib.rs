//! # crossmcp Transport
//!
//! Asynchronous frame transports for MCP connections. A [`Transport`] moves
//! opaque byte frames (one JSON-RPC message, possibly a batch, per frame)
//! between peers; framing, codec, and dispatch live in the layers above.
//!
//! Two implementations ship here:
//!
//! - [`stdio::StdioTransport`]: newline-delimited JSON over any async
//!   read/write pair (process stdio by default, child-process pipes via
//!   [`stdio::StdioTransport::from_raw`]).
//! - [`memory::InMemoryTransport`]: a channel-backed duplex pair for tests and
//!   in-process embedding.
//!
//! The Streamable HTTP transport has its own crate (`crossmcp-streamable`)
//! since it is a multi-session engine rather than a point-to-point pipe.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod memory;
pub mod stdio;
mod traits;

pub use error::{TransportError, TransportResult};
pub use memory::InMemoryTransport;
pub use stdio::StdioTransport;
pub use traits::{Transport, TransportState};
