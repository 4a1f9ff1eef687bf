//! Turn dispatcher — runs one turn against the reasoning engine.
//!
//! The engine streams text and tool calls. Each tool call becomes a
//! [`ToolInvocation`] routed through the capability registry, and its result
//! goes back to the engine before the next event is read. The whole turn runs
//! under the configured timeout; on expiry, or when the caller cancels it,
//! the in-flight invocation is dropped and the turn closes with every
//! unresolved invocation cancelled.

use mcbridge_capabilities::CapabilityRegistry;
use mcbridge_core::error::EngineError;
use mcbridge_core::tool::parse_qualified_name;
use mcbridge_core::{
    BridgeEvent, EngineEvent, EventBus, ToolFailure, ToolInvocation, ToolOutcome, Turn, TurnInput,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::session::SessionController;

const RESULT_LOG_LIMIT: usize = 200;

/// What happened in one turn.
#[derive(Debug)]
pub struct TurnReport {
    pub turn: Turn,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

enum Ending {
    Finished(Result<(), EngineError>),
    TimedOut,
    Cancelled,
}

#[derive(Clone)]
pub struct TurnDispatcher {
    registry: Arc<CapabilityRegistry>,
    bus: EventBus,
    turn_timeout: Duration,
}

impl TurnDispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, bus: EventBus, turn_timeout: Duration) -> Self {
        Self {
            registry,
            bus,
            turn_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run turn `turn_id` to completion or timeout.
    ///
    /// Only a broken engine channel is an error; tool failures are reported
    /// to the engine and the turn carries on.
    pub async fn run_turn(
        &self,
        session: &mut SessionController,
        turn_id: u64,
        input: TurnInput,
    ) -> Result<TurnReport, EngineError> {
        self.run_turn_until(session, turn_id, input, std::future::pending())
            .await
    }

    /// Like [`run_turn`](Self::run_turn), but the turn is closed as cancelled
    /// as soon as `cancel` completes.
    pub async fn run_turn_until(
        &self,
        session: &mut SessionController,
        turn_id: u64,
        input: TurnInput,
        cancel: impl Future<Output = ()>,
    ) -> Result<TurnReport, EngineError> {
        let started = Instant::now();
        info!(
            turn_id,
            idle = input.is_idle(),
            events = input.event_count(),
            "Turn started"
        );
        self.bus.publish(BridgeEvent::TurnStarted {
            turn_id,
            idle: input.is_idle(),
            events: input.event_count(),
            timestamp: chrono::Utc::now(),
        });

        let mut turn = Turn::open(turn_id, input);
        let ending = tokio::select! {
            outcome = tokio::time::timeout(self.turn_timeout, self.drive(session, &mut turn)) => {
                match outcome {
                    Ok(result) => Ending::Finished(result),
                    Err(_) => Ending::TimedOut,
                }
            }
            _ = cancel => Ending::Cancelled,
        };

        let (timed_out, cancelled) = match ending {
            Ending::Finished(Ok(())) => {
                turn.close("turn finished");
                (false, false)
            }
            Ending::Finished(Err(e)) => {
                turn.close("engine channel failed");
                self.publish_closed(&turn, false, false, started.elapsed());
                return Err(e);
            }
            Ending::TimedOut => {
                warn!(
                    turn_id,
                    timeout_secs = self.turn_timeout.as_secs(),
                    unresolved = turn.unresolved(),
                    "Turn timed out"
                );
                turn.close("turn timed out");
                (true, false)
            }
            Ending::Cancelled => {
                warn!(turn_id, unresolved = turn.unresolved(), "Turn cancelled");
                turn.close("turn cancelled");
                (false, true)
            }
        };

        let duration = started.elapsed();
        self.publish_closed(&turn, timed_out, cancelled, duration);
        Ok(TurnReport {
            turn,
            timed_out,
            cancelled,
            duration,
        })
    }

    fn publish_closed(&self, turn: &Turn, timed_out: bool, cancelled: bool, duration: Duration) {
        self.bus.publish(BridgeEvent::TurnClosed {
            turn_id: turn.id,
            invocations: turn.invocations().len(),
            timed_out,
            cancelled,
            duration_ms: duration.as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn drive(
        &self,
        session: &mut SessionController,
        turn: &mut Turn,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        session.begin_turn(turn.id, &turn.input).await?;

        loop {
            match session.next_event().await? {
                EngineEvent::Text { text } => {
                    info!("[engine] {text}");
                }
                EngineEvent::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    let outcome = self.dispatch(turn, &name, arguments).await;
                    session.send_tool_result(&call_id, &outcome).await?;
                }
                EngineEvent::Done { response } => {
                    info!(
                        "[done] {} tool calls in {}ms",
                        turn.invocations().len(),
                        started.elapsed().as_millis()
                    );
                    turn.response = response;
                    return Ok(());
                }
            }
        }
    }

    /// Route one tool call and record it on the turn.
    async fn dispatch(&self, turn: &mut Turn, name: &str, arguments: serde_json::Value) -> ToolOutcome {
        let Some((provider, operation)) = parse_qualified_name(name) else {
            warn!(tool = %name, "[tool error] unrecognized tool name");
            return ToolOutcome::Failure(ToolFailure::UnknownOperation {
                provider: String::new(),
                operation: name.to_string(),
            });
        };

        info!("[tool call] {provider}.{operation}: {arguments}");
        let invocation = ToolInvocation::new(provider, operation, arguments);
        turn.dispatched(invocation.clone());

        let started = Instant::now();
        let result = self.registry.invoke(&invocation).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result.outcome {
            ToolOutcome::Success(value) => {
                info!("[tool result] {}", truncate(&value.to_string(), RESULT_LOG_LIMIT));
            }
            ToolOutcome::Failure(failure) => {
                warn!("[tool error] {failure}");
            }
        }
        self.bus.publish(BridgeEvent::ToolInvoked {
            turn_id: turn.id,
            provider: invocation.provider.to_string(),
            operation: invocation.operation.clone(),
            success: result.is_success(),
            duration_ms,
            timestamp: chrono::Utc::now(),
        });

        let outcome = result.outcome.clone();
        turn.resolved(result);
        outcome
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
