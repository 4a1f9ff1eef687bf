//! Reasoning engine channel for mcbridge.
//!
//! The engine is an external process holding the agent's reasoning session.
//! [`StdioEngine`] implements [`ReasoningEngine`] over a JSON-lines protocol
//! on the process's stdio: the bridge sends the session start and turn
//! inputs, the engine streams text, tool calls, and a final done frame.
//!
//! [`ReasoningEngine`]: mcbridge_core::ReasoningEngine

pub mod protocol;
pub mod stdio;

pub use stdio::StdioEngine;
