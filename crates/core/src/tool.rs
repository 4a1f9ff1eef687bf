//! Tool invocation types and the capability-provider channel trait.
//!
//! Capability providers are external processes (or in-process stand-ins)
//! exposing a named set of operations. The reasoning engine asks for an
//! operation by qualified name; the registry resolves it to a provider and
//! sends a correlated request over that provider's channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a configured capability provider (e.g. "minecraft").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One operation in a provider's advertised catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments object
    #[serde(default = "empty_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_schema(),
        }
    }
}

const QUALIFIED_PREFIX: &str = "mcp__";

/// The name the engine sees for `provider`'s `operation`.
pub fn qualified_name(provider: &ProviderId, operation: &str) -> String {
    format!("{QUALIFIED_PREFIX}{}__{operation}", provider.0)
}

/// Split an engine-facing tool name into provider and operation.
///
/// Accepts `mcp__provider__operation`, `provider__operation` and
/// `provider.operation`.
pub fn parse_qualified_name(name: &str) -> Option<(ProviderId, String)> {
    let bare = name.strip_prefix(QUALIFIED_PREFIX).unwrap_or(name);
    let (provider, operation) = bare
        .split_once("__")
        .or_else(|| bare.split_once('.'))?;
    if provider.is_empty() || operation.is_empty() {
        return None;
    }
    Some((ProviderId::new(provider), operation.to_string()))
}

/// A request to run one provider operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub provider: ProviderId,
    pub operation: String,
    pub arguments: serde_json::Value,
    pub correlation_id: String,
}

impl ToolInvocation {
    pub fn new(
        provider: ProviderId,
        operation: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            provider,
            operation: operation.into(),
            arguments,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Why an invocation did not succeed. Reported to the engine, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolFailure {
    #[error("provider '{provider}' is unavailable")]
    ProviderUnavailable { provider: String },

    #[error("provider '{provider}' has no operation '{operation}'")]
    UnknownOperation { provider: String, operation: String },

    #[error("{reason}")]
    Rejected { reason: String },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(ToolFailure),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// The single answer to a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub correlation_id: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(correlation_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: ToolOutcome::Success(value),
        }
    }

    pub fn failure(correlation_id: impl Into<String>, failure: ToolFailure) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: ToolOutcome::Failure(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// An unsolicited message from a provider (not tied to a request).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderNotification {
    pub provider: ProviderId,
    pub event: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ProviderNotification {
    /// Whether this notification reports that the game link went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self.event.as_str(),
            "disconnected" | "kicked" | "end" | "provider_exited"
        )
    }
}

/// A request/response channel to one capability provider.
///
/// Implementations must resolve every call with an outcome. If the caller's
/// future is dropped mid-flight, the implementation forgets the correlation
/// entry so a late response cannot be mismatched.
#[async_trait]
pub trait ProviderChannel: Send + Sync {
    fn id(&self) -> &ProviderId;

    /// Operations advertised when the channel was established.
    fn catalog(&self) -> Vec<OperationDescriptor>;

    /// Whether the channel can still carry requests.
    fn is_alive(&self) -> bool;

    /// Send one correlated request and wait for its outcome.
    async fn call(&self, invocation: &ToolInvocation) -> ToolOutcome;

    /// Close the channel. Pending calls resolve as unavailable.
    async fn shutdown(&self) {}
}
