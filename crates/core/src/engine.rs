//! ReasoningEngine trait — the abstraction over the agent's reasoning backend.
//!
//! The engine is an external system reached over one persistent, bidirectional
//! channel. The bridge starts a session with the system instructions and the
//! tool catalog, then drives turns: it sends one input and reads a stream of
//! text and tool-call events until the engine reports the turn done.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::tool::ToolOutcome;
use crate::turn::TurnInput;

/// A tool definition sent to the engine so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Qualified name (`mcp__<provider>__<operation>`)
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Something the engine emitted during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Narration or reasoning text.
    Text { text: String },

    /// The engine wants a tool run and will wait for its result.
    ToolCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },

    /// The turn is complete.
    Done {
        #[serde(default)]
        response: Option<String>,
    },
}

/// The core ReasoningEngine trait.
///
/// All methods take `&mut self`: the channel has a single owner (the session
/// controller) and requests on it are strictly sequential.
#[async_trait]
pub trait ReasoningEngine: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Send the instructions document and tool catalog. Called once.
    async fn start_session(
        &mut self,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> std::result::Result<(), EngineError>;

    /// Deliver the input that opens turn `turn_id`.
    async fn begin_turn(
        &mut self,
        turn_id: u64,
        input: &TurnInput,
    ) -> std::result::Result<(), EngineError>;

    /// Wait for the next event of the open turn.
    async fn next_event(&mut self) -> std::result::Result<EngineEvent, EngineError>;

    /// Answer a tool call of the open turn.
    async fn send_tool_result(
        &mut self,
        call_id: &str,
        outcome: &ToolOutcome,
    ) -> std::result::Result<(), EngineError>;

    /// Release the channel.
    async fn close(&mut self) {}
}
