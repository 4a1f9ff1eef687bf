//! Frames exchanged with the reasoning engine process.
//!
//! Everything the engine sends during a turn carries the turn id it belongs
//! to, so output that arrives after a turn was abandoned can be recognized
//! and dropped.

use mcbridge_core::{DomainEvent, EngineEvent, ToolDefinition, ToolOutcome, TurnInput};
use serde::{Deserialize, Serialize};

/// Bridge → engine.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest<'a> {
    SessionStart {
        instructions: &'a str,
        tools: &'a [ToolDefinition],
        model: &'a str,
    },
    Turn {
        turn_id: u64,
        input: TurnPayload<'a>,
    },
    ToolResult {
        turn_id: u64,
        call_id: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        ok: Option<&'a serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl<'a> EngineRequest<'a> {
    pub fn tool_result(turn_id: u64, call_id: &'a str, outcome: &'a ToolOutcome) -> Self {
        let (ok, error) = match outcome {
            ToolOutcome::Success(value) => (Some(value), None),
            ToolOutcome::Failure(failure) => (None, Some(failure.to_string())),
        };
        Self::ToolResult {
            turn_id,
            call_id,
            ok,
            error,
        }
    }
}

/// The structured turn input: events for a batch, always a rendered prompt.
#[derive(Debug, Serialize)]
pub struct TurnPayload<'a> {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "no_events")]
    pub events: &'a [DomainEvent],
    pub prompt: String,
}

fn no_events(events: &&[DomainEvent]) -> bool {
    events.is_empty()
}

impl<'a> TurnPayload<'a> {
    pub fn from_input(input: &'a TurnInput) -> Self {
        let (kind, events): (&'static str, &'a [DomainEvent]) = match input {
            TurnInput::Batch { batch } => ("batch", batch.events()),
            TurnInput::Idle => ("idle", &[]),
            TurnInput::Startup { .. } => ("startup", &[]),
        };
        Self {
            kind,
            events,
            prompt: input.prompt(),
        }
    }
}

/// Engine → bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineFrame {
    pub turn_id: u64,
    #[serde(flatten)]
    pub event: EngineEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcbridge_core::{EventBatch, ToolFailure};

    #[test]
    fn batch_turn_carries_events_and_prompt() {
        let batch = EventBatch::new(
            vec![
                DomainEvent::chat("Alice", "HaksBot can you help me?"),
                DomainEvent::chat("Alice", "I need iron"),
            ],
            true,
        )
        .unwrap();
        let input = TurnInput::batch(batch);
        let frame = EngineRequest::Turn {
            turn_id: 3,
            input: TurnPayload::from_input(&input),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "turn");
        assert_eq!(value["turn_id"], 3);
        assert_eq!(value["input"]["kind"], "batch");
        assert_eq!(value["input"]["events"][1]["text"], "I need iron");
        assert!(value["input"]["prompt"].as_str().unwrap().starts_with("Server log:"));
    }

    #[test]
    fn idle_turn_omits_events() {
        let input = TurnInput::Idle;
        let value = serde_json::to_value(TurnPayload::from_input(&input)).unwrap();
        assert_eq!(value["kind"], "idle");
        assert!(value.get("events").is_none());
    }

    #[test]
    fn failed_tool_result_carries_reason() {
        let outcome = ToolOutcome::Failure(ToolFailure::ProviderUnavailable {
            provider: "admin".into(),
        });
        let value = serde_json::to_value(EngineRequest::tool_result(1, "c9", &outcome)).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["call_id"], "c9");
        assert_eq!(value["error"], "provider 'admin' is unavailable");
        assert!(value.get("ok").is_none());
    }

    #[test]
    fn inbound_frame_flattens_event() {
        let frame: EngineFrame =
            serde_json::from_str(r#"{"type":"text","turn_id":2,"text":"On my way"}"#).unwrap();
        assert_eq!(frame.turn_id, 2);
        assert_eq!(
            frame.event,
            EngineEvent::Text {
                text: "On my way".into()
            }
        );
    }
}
