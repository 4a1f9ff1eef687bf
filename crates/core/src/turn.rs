//! The unit of reasoning work.
//!
//! A [`Turn`] starts with one input (a released batch or an idle tick), records
//! every tool invocation the engine asks for, and is closed once the engine
//! reports completion or the turn is aborted. Closing a turn resolves every
//! invocation that is still waiting with a cancellation outcome.

use serde::{Deserialize, Serialize};

use crate::event::EventBatch;
use crate::tool::{ToolFailure, ToolInvocation, ToolResult};

/// What a turn was opened for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnInput {
    /// Game events that passed the relevance policy.
    Batch { batch: EventBatch },

    /// Nothing happened for a while; the engine may act on its own.
    Idle,

    /// First turn after the session starts.
    Startup { prompt: String },
}

impl TurnInput {
    pub fn batch(batch: EventBatch) -> Self {
        Self::Batch { batch }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn event_count(&self) -> usize {
        match self {
            Self::Batch { batch } => batch.len(),
            _ => 0,
        }
    }

    /// Plain-text prompt for the engine.
    pub fn prompt(&self) -> String {
        match self {
            Self::Batch { batch } => batch.render(),
            Self::Idle => "No server activity recently. Decide whether there is anything \
                           worth doing on your own."
                .into(),
            Self::Startup { prompt } => prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    Open,
    Closed,
}

/// One invocation and, once known, its result.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub invocation: ToolInvocation,
    pub result: Option<ToolResult>,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub id: u64,
    pub input: TurnInput,
    invocations: Vec<InvocationRecord>,
    state: TurnState,
    /// Final text from the engine, if the turn completed normally.
    pub response: Option<String>,
}

impl Turn {
    pub fn open(id: u64, input: TurnInput) -> Self {
        Self {
            id,
            input,
            invocations: Vec::new(),
            state: TurnState::Open,
            response: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn invocations(&self) -> &[InvocationRecord] {
        &self.invocations
    }

    /// Record an invocation as dispatched.
    pub fn dispatched(&mut self, invocation: ToolInvocation) {
        debug_assert_eq!(self.state, TurnState::Open);
        self.invocations.push(InvocationRecord {
            invocation,
            result: None,
        });
    }

    /// Attach a result to its invocation. Returns false if no unresolved
    /// invocation carries that correlation id.
    pub fn resolved(&mut self, result: ToolResult) -> bool {
        let slot = self.invocations.iter_mut().find(|r| {
            r.result.is_none() && r.invocation.correlation_id == result.correlation_id
        });
        match slot {
            Some(record) => {
                record.result = Some(result);
                true
            }
            None => false,
        }
    }

    /// Number of invocations still waiting for a result.
    pub fn unresolved(&self) -> usize {
        self.invocations.iter().filter(|r| r.result.is_none()).count()
    }

    /// Close the turn. Any invocation without a result is resolved as
    /// cancelled with `reason`.
    pub fn close(&mut self, reason: &str) {
        for record in self.invocations.iter_mut().filter(|r| r.result.is_none()) {
            record.result = Some(ToolResult::failure(
                record.invocation.correlation_id.clone(),
                ToolFailure::Cancelled {
                    reason: reason.to_string(),
                },
            ));
        }
        self.state = TurnState::Closed;
    }
}
