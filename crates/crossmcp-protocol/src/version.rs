//! Protocol version negotiation and feature gating.
//!
//! Versions are opaque date-like strings (`YYYY-MM-DD`) compared
//! lexicographically, which coincides with chronological order.

/// Latest protocol version this implementation speaks.
pub const LATEST_VERSION: &str = "2025-11-25";

/// Supported protocol versions in preference order (latest first).
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18", "2025-03-26", "2024-11-05"];

/// First version with SSE priming events and general (id-less) cancellation.
const PRIMING_SINCE: &str = "2025-11-25";

/// True if `version` is one this implementation supports.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Server-side version selection: the client's requested version if
/// supported, otherwise the latest version the server speaks. The client
/// aborts if the reply is unacceptable to it.
pub fn negotiate(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(LATEST_VERSION)
}

/// Whether the negotiated version supports SSE priming events.
pub fn supports_priming(negotiated: &str) -> bool {
    negotiated >= PRIMING_SINCE
}

/// Whether the negotiated version allows `notifications/cancelled` without a
/// `requestId`.
pub fn supports_general_cancellation(negotiated: &str) -> bool {
    negotiated >= PRIMING_SINCE
}
