//! Frames exchanged with a capability provider process.
//!
//! One JSON object per line. The provider speaks first with its catalog;
//! afterwards the bridge sends requests and the provider answers each with a
//! response carrying the same correlation id. Notifications may arrive at any
//! time.

use mcbridge_core::{OperationDescriptor, ToolFailure, ToolOutcome};
use serde::{Deserialize, Serialize};

/// Provider → bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderFrame {
    Catalog {
        operations: Vec<OperationDescriptor>,
    },
    Response {
        correlation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Notification {
        event: String,
        #[serde(default)]
        detail: serde_json::Value,
    },
}

impl ProviderFrame {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Bridge → provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame<'a> {
    Request {
        correlation_id: &'a str,
        operation: &'a str,
        arguments: &'a serde_json::Value,
    },
}

/// Map a response's `ok`/`error` pair to an outcome. An error wins; a
/// response with neither is a success with a null value.
pub fn response_outcome(ok: Option<serde_json::Value>, error: Option<String>) -> ToolOutcome {
    match error {
        Some(reason) => ToolOutcome::Failure(ToolFailure::Rejected { reason }),
        None => ToolOutcome::Success(ok.unwrap_or(serde_json::Value::Null)),
    }
}
