//! Error types for the mcbridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each link in the bridge (engine, capability providers, feed, game session)
//! has its own error enum; tool-level failures are not errors at all but
//! [`ToolFailure`](crate::tool::ToolFailure) payloads handed back to the engine.

use thiserror::Error;

/// The top-level error type for all mcbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Reasoning engine ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Capability providers ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Event feed ---
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    // --- Game session ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures on the reasoning-engine channel. Any of these during a turn is
/// fatal to the process; the supervisor is expected to restart it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Failed to start engine process: {0}")]
    Spawn(String),

    #[error("Engine channel closed: {0}")]
    ChannelClosed(String),

    #[error("Failed to send to engine: {0}")]
    Send(String),

    #[error("Engine protocol violation: {0}")]
    Protocol(String),

    #[error("Engine did not respond within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Failures establishing or keeping a capability-provider channel.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Failed to start provider '{provider}': {reason}")]
    Spawn { provider: String, reason: String },

    #[error("Provider '{provider}' did not advertise its catalog: {reason}")]
    Handshake { provider: String, reason: String },

    #[error("Provider channel closed: {0}")]
    ChannelClosed(String),

    #[error("Provider protocol violation: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("Failed to open feed {source_name}: {reason}")]
    Open { source_name: String, reason: String },

    #[error("Feed read failed: {0}")]
    Read(String),

    #[error("Invalid feed grammar: {0}")]
    Grammar(String),
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Illegal connection transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Game connection lost and reconnect is disabled: {0}")]
    ReconnectDisabled(String),

    #[error("Session controller stopped")]
    Stopped,
}
