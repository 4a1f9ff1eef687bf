//! # mcbridge Core
//!
//! Domain types, traits, and error definitions for the mcbridge orchestrator.
//! The bridge keeps a reasoning engine aware of what happens in a live game
//! session and routes the engine's tool requests to capability providers.
//!
//! ## Design Philosophy
//!
//! Every external link (reasoning engine, capability provider) is a trait
//! here. Implementations live in their respective crates, which keeps the
//! orchestration crates testable with scripted stand-ins.

pub mod bus;
pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod instructions;
pub mod process;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use bus::{BridgeEvent, EventBus};
pub use connection::{BackoffState, ConnectionSnapshot, ConnectionState};
pub use engine::{EngineEvent, ReasoningEngine, ToolDefinition};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBatch};
pub use instructions::{InstructionPaths, SystemInstructions};
pub use tool::{
    OperationDescriptor, ProviderChannel, ProviderId, ProviderNotification, ToolFailure,
    ToolInvocation, ToolOutcome, ToolResult,
};
pub use turn::{InvocationRecord, Turn, TurnInput, TurnState};
