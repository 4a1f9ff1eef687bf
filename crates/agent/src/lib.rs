//! The orchestration side of mcbridge.
//!
//! Game events flow through four stages:
//!
//! 1. **Batch** — the [`EventBatcher`] groups events until the chat goes
//!    quiet, then asks the relevance policy whether the batch matters
//! 2. **Queue** — the [`Orchestrator`] holds relevant batches (and idle
//!    ticks) while a turn is running, coalescing them into the next turn
//! 3. **Dispatch** — the [`TurnDispatcher`] drives one turn on the reasoning
//!    engine and routes its tool calls to capability providers
//! 4. **Session** — the [`SessionController`] owns the engine channel and the
//!    game link, reconnecting with exponential backoff when the link drops

pub mod batcher;
pub mod dispatcher;
pub mod orchestrator;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use batcher::{
    AlwaysRelevant, DebounceTimer, EventBatcher, MentionPolicy, RelevancePolicy,
    policy_from_config,
};
pub use dispatcher::{TurnDispatcher, TurnReport};
pub use orchestrator::Orchestrator;
pub use session::{
    BackoffPolicy, GameLink, LinkAction, LinkHandle, ReconnectMachine, SessionController,
};
