//! Capability providers for mcbridge.
//!
//! A capability provider is an external process exposing named operations
//! (movement, chat, building, server administration, memory). Each one is
//! reached over a JSON-lines channel on its stdio and advertises its catalog
//! when it starts. The [`CapabilityRegistry`] owns every channel and routes
//! invocations by provider id and operation name.

pub mod protocol;
pub mod registry;
pub mod session;
pub mod stdio;

pub use registry::{CapabilityRegistry, ProviderLaunch, launches_from_config};
pub use session::{CONNECTION_STATUS_OP, SESSION_PROVIDER, SessionStatusProvider};
pub use stdio::StdioProvider;
