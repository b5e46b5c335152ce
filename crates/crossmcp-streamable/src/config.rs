//! Configuration for the Streamable HTTP engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::event_store::EventStore;

/// Generator for new session ids. Configuring one puts the engine in
/// stateful mode: the initialize response carries `Mcp-Session-Id` and
/// subsequent requests must echo it.
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Host-header policy guarding against DNS rebinding.
#[derive(Debug, Clone, Default)]
pub enum HostPolicy {
    /// Allow only localhost equivalents (`localhost`, `127.0.0.1`, `::1`),
    /// any port. The default.
    #[default]
    Localhost,
    /// Allow an explicit host list (compared without port, case-insensitive).
    AllowList(Vec<String>),
    /// No host validation.
    Disabled,
}

impl HostPolicy {
    /// Whether a `Host` header value passes this policy.
    pub fn permits(&self, host: Option<&str>) -> bool {
        match self {
            Self::Disabled => true,
            Self::Localhost => {
                let Some(name) = host.map(strip_port) else {
                    return false;
                };
                matches!(
                    name.to_ascii_lowercase().as_str(),
                    "localhost" | "127.0.0.1" | "::1" | "[::1]"
                )
            }
            Self::AllowList(allowed) => {
                let Some(name) = host.map(strip_port) else {
                    return false;
                };
                allowed.iter().any(|a| a.eq_ignore_ascii_case(name))
            }
        }
    }
}

/// Strip the `:port` suffix, handling bracketed IPv6 literals.
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        return &host[1..=end];
    }
    host.rsplit_once(':')
        .map_or(host, |(name, port)| {
            // IPv6 without brackets has multiple colons; don't split those.
            if name.contains(':') || port.chars().any(|c| !c.is_ascii_digit()) {
                host
            } else {
                name
            }
        })
}

/// Streamable HTTP engine configuration.
#[derive(Clone)]
pub struct StreamableHttpConfig {
    /// Path of the single MCP endpoint
    pub endpoint_path: String,
    /// Stateful session id generator, or `None` for stateless operation
    pub session_id_generator: Option<SessionIdGenerator>,
    /// Host-header policy
    pub host_policy: HostPolicy,
    /// Optional event store enabling `Last-Event-ID` resumption
    pub event_store: Option<Arc<dyn EventStore>>,
    /// Idle TTL after which a session expires
    pub session_ttl: Duration,
    /// Retry hint carried on priming events, in milliseconds
    pub sse_retry_ms: Option<u32>,
    /// Bounded depth of each stream's send queue
    pub stream_queue_depth: usize,
    /// SSE keepalive comment interval
    pub keepalive: Duration,
}

impl fmt::Debug for StreamableHttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpConfig")
            .field("endpoint_path", &self.endpoint_path)
            .field("stateful", &self.session_id_generator.is_some())
            .field("host_policy", &self.host_policy)
            .field("has_event_store", &self.event_store.is_some())
            .field("session_ttl", &self.session_ttl)
            .field("stream_queue_depth", &self.stream_queue_depth)
            .finish()
    }
}

impl Default for StreamableHttpConfig {
    fn default() -> Self {
        StreamableHttpConfigBuilder::new().build()
    }
}

impl StreamableHttpConfig {
    /// True when the engine tracks sessions via `Mcp-Session-Id`.
    pub fn is_stateful(&self) -> bool {
        self.session_id_generator.is_some()
    }
}

/// Builder for [`StreamableHttpConfig`].
pub struct StreamableHttpConfigBuilder {
    endpoint_path: String,
    session_id_generator: Option<SessionIdGenerator>,
    host_policy: HostPolicy,
    event_store: Option<Arc<dyn EventStore>>,
    session_ttl: Duration,
    sse_retry_ms: Option<u32>,
    stream_queue_depth: usize,
    keepalive: Duration,
}

impl fmt::Debug for StreamableHttpConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpConfigBuilder")
            .field("endpoint_path", &self.endpoint_path)
            .field("stateful", &self.session_id_generator.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for StreamableHttpConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamableHttpConfigBuilder {
    /// Defaults: stateful with UUID session ids, localhost-only hosts, no
    /// event store, 300 s idle TTL.
    pub fn new() -> Self {
        Self {
            endpoint_path: "/".to_string(),
            session_id_generator: Some(Arc::new(|| Uuid::new_v4().to_string())),
            host_policy: HostPolicy::default(),
            event_store: None,
            session_ttl: Duration::from_secs(300),
            sse_retry_ms: None,
            stream_queue_depth: 64,
            keepalive: Duration::from_secs(30),
        }
    }

    /// Set the endpoint path (default `/`).
    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    /// Use a custom session id generator (stateful mode).
    pub fn with_session_id_generator(mut self, generator: SessionIdGenerator) -> Self {
        self.session_id_generator = Some(generator);
        self
    }

    /// Skip session tracking entirely.
    pub fn stateless(mut self) -> Self {
        self.session_id_generator = None;
        self
    }

    /// Set the host policy.
    pub fn with_host_policy(mut self, policy: HostPolicy) -> Self {
        self.host_policy = policy;
        self
    }

    /// Allow these hosts in addition to nothing else.
    pub fn with_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.host_policy = HostPolicy::AllowList(hosts);
        self
    }

    /// Enable resumability through an event store.
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Idle TTL for sessions (default 300 s).
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Retry hint for priming events.
    pub fn with_sse_retry_ms(mut self, retry_ms: u32) -> Self {
        self.sse_retry_ms = Some(retry_ms);
        self
    }

    /// Per-stream send queue depth (default 64). A stream that exceeds it is
    /// closed.
    pub fn with_stream_queue_depth(mut self, depth: usize) -> Self {
        self.stream_queue_depth = depth;
        self
    }

    /// SSE keepalive interval (default 30 s).
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> StreamableHttpConfig {
        StreamableHttpConfig {
            endpoint_path: self.endpoint_path,
            session_id_generator: self.session_id_generator,
            host_policy: self.host_policy,
            event_store: self.event_store,
            session_ttl: self.session_ttl,
            sse_retry_ms: self.sse_retry_ms,
            stream_queue_depth: self.stream_queue_depth,
            keepalive: self.keepalive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_stateful_localhost() {
        let config = StreamableHttpConfig::default();
        assert!(config.is_stateful());
        assert_eq!(config.endpoint_path, "/");
        assert!(matches!(config.host_policy, HostPolicy::Localhost));
    }

    #[test]
    fn localhost_policy() {
        let policy = HostPolicy::Localhost;
        assert!(policy.permits(Some("localhost")));
        assert!(policy.permits(Some("localhost:8080")));
        assert!(policy.permits(Some("127.0.0.1:3000")));
        assert!(policy.permits(Some("[::1]:3000")));
        assert!(policy.permits(Some("::1")));
        assert!(!policy.permits(Some("evil.attacker.com")));
        assert!(!policy.permits(Some("evil.attacker.com:80")));
        assert!(!policy.permits(None));
    }

    #[test]
    fn allow_list_policy_ignores_port_and_case() {
        let policy = HostPolicy::AllowList(vec!["mcp.example.com".to_string()]);
        assert!(policy.permits(Some("mcp.example.com")));
        assert!(policy.permits(Some("MCP.Example.Com:443")));
        assert!(!policy.permits(Some("other.example.com")));
    }

    #[test]
    fn disabled_policy_permits_everything() {
        assert!(HostPolicy::Disabled.permits(Some("anything")));
        assert!(HostPolicy::Disabled.permits(None));
    }

    #[test]
    fn stateless_builder() {
        let config = StreamableHttpConfigBuilder::new().stateless().build();
        assert!(!config.is_stateful());
    }
}
