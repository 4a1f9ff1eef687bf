//! Server log feed for mcbridge.
//!
//! Turns a raw, line-oriented feed into typed [`DomainEvent`]s:
//!
//! - **Sources** produce raw lines (a polling command or a tailed log file)
//! - **Grammar** classifies each line as chat, join, leave, or system notice
//! - **Self filter** drops chat the agent itself wrote
//!
//! The adapter runs on its own task and only ever enqueues parsed events, so
//! a slow or blocked feed never stalls the orchestrator.
//!
//! [`DomainEvent`]: mcbridge_core::DomainEvent

pub mod adapter;
pub mod filter;
pub mod grammar;
pub mod source;

pub use adapter::EventAdapter;
pub use filter::SelfFilter;
pub use grammar::LineGrammar;
pub use source::{CommandFeed, FeedSource, FileTailFeed, from_config};
