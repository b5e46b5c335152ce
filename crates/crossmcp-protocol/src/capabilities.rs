//! Capability sets exchanged during initialize, and the method → capability
//! requirement tables used for gating outbound requests.

use serde::{Deserialize, Serialize};

use crate::methods;
use crate::types::ExperimentalCapabilities;

/// Capabilities a client advertises in `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental, implementation-specific capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<ExperimentalCapabilities>,
    /// The client can answer `roots/list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    /// The client can answer `sampling/createMessage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
    /// The client can answer `elicitation/create`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapability>,
}

impl ClientCapabilities {
    /// Capabilities with roots, sampling, and elicitation all enabled.
    pub fn full() -> Self {
        Self {
            experimental: None,
            roots: Some(RootsCapability {
                list_changed: Some(true),
            }),
            sampling: Some(SamplingCapability::default()),
            elicitation: Some(ElicitationCapability::default()),
        }
    }
}

/// Sub-flags of the `roots` capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// The client emits `notifications/roots/list_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// The `sampling` capability (no sub-flags today).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingCapability {}

/// The `elicitation` capability (no sub-flags today).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElicitationCapability {}

/// Capabilities a server advertises in its initialize result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental, implementation-specific capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<ExperimentalCapabilities>,
    /// The server emits `notifications/message`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
    /// The server answers `completion/complete`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionsCapability>,
    /// The server serves prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    /// The server serves resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// The server serves tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl ServerCapabilities {
    /// Enable the `tools` capability with list-changed notifications.
    pub fn with_tools(mut self) -> Self {
        self.tools = Some(ToolsCapability {
            list_changed: Some(true),
        });
        self
    }

    /// Enable the `resources` capability with subscribe and list-changed.
    pub fn with_resources(mut self) -> Self {
        self.resources = Some(ResourcesCapability {
            subscribe: Some(true),
            list_changed: Some(true),
        });
        self
    }

    /// Enable the `prompts` capability with list-changed notifications.
    pub fn with_prompts(mut self) -> Self {
        self.prompts = Some(PromptsCapability {
            list_changed: Some(true),
        });
        self
    }

    /// Enable the `logging` capability.
    pub fn with_logging(mut self) -> Self {
        self.logging = Some(LoggingCapability::default());
        self
    }

    /// Enable the `completions` capability.
    pub fn with_completions(mut self) -> Self {
        self.completions = Some(CompletionsCapability::default());
        self
    }
}

/// The `logging` capability (no sub-flags today).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingCapability {}

/// The `completions` capability (no sub-flags today).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionsCapability {}

/// Sub-flags of the `prompts` capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    /// The server emits `notifications/prompts/list_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Sub-flags of the `resources` capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// The server supports `resources/subscribe`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// The server emits `notifications/resources/list_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Sub-flags of the `tools` capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// The server emits `notifications/tools/list_changed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// The capability sets of a negotiated peer, as seen from either side.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCapabilities {
    /// The remote peer is a client
    Client(ClientCapabilities),
    /// The remote peer is a server
    Server(ServerCapabilities),
}

impl PeerCapabilities {
    /// Whether the peer has declared the capability required to receive
    /// `method` as a request. Methods with no gate always pass.
    ///
    /// A mismatch between peer role and method family (asking a client for
    /// `completion/complete`, say) fails the check.
    pub fn allows(&self, method: &str) -> bool {
        match self {
            Self::Client(caps) => match method {
                methods::LIST_ROOTS => caps.roots.is_some(),
                methods::CREATE_MESSAGE => caps.sampling.is_some(),
                methods::ELICIT => caps.elicitation.is_some(),
                _ => !is_server_gated(method),
            },
            Self::Server(caps) => match method {
                methods::COMPLETE => caps.completions.is_some(),
                methods::SET_LEVEL => caps.logging.is_some(),
                methods::LIST_PROMPTS | methods::GET_PROMPT => caps.prompts.is_some(),
                methods::LIST_TOOLS | methods::CALL_TOOL => caps.tools.is_some(),
                methods::LIST_RESOURCES | methods::READ_RESOURCE => caps.resources.is_some(),
                methods::SUBSCRIBE | methods::UNSUBSCRIBE => caps
                    .resources
                    .as_ref()
                    .is_some_and(|r| r.subscribe.unwrap_or(false)),
                _ => !is_client_gated(method),
            },
        }
    }
}

/// Methods only a client (not a server) can be asked to answer.
fn is_client_gated(method: &str) -> bool {
    matches!(
        method,
        methods::LIST_ROOTS | methods::CREATE_MESSAGE | methods::ELICIT
    )
}

/// Methods only a server (not a client) can be asked to answer.
fn is_server_gated(method: &str) -> bool {
    matches!(
        method,
        methods::COMPLETE
            | methods::SET_LEVEL
            | methods::LIST_PROMPTS
            | methods::GET_PROMPT
            | methods::LIST_TOOLS
            | methods::CALL_TOOL
            | methods::LIST_RESOURCES
            | methods::READ_RESOURCE
            | methods::SUBSCRIBE
            | methods::UNSUBSCRIBE
    )
}
