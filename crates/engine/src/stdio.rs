//! Reasoning engine reached over a child process's stdio.
//!
//! The engine process is started once and lives as long as the bridge. Its
//! stdout closing is unrecoverable: the session cannot continue without it.

use async_trait::async_trait;
use mcbridge_config::EngineConfig;
use mcbridge_core::error::EngineError;
use mcbridge_core::process::{LineProcess, ProcessSpec};
use mcbridge_core::{EngineEvent, ReasoningEngine, ToolDefinition, ToolOutcome, TurnInput};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::protocol::{EngineFrame, EngineRequest, TurnPayload};

pub struct StdioEngine {
    name: String,
    model: String,
    process: LineProcess,
    /// Turn whose frames are currently accepted
    open_turn: Option<u64>,
}

impl StdioEngine {
    pub fn spawn(spec: &ProcessSpec, model: impl Into<String>) -> Result<Self, EngineError> {
        let process = LineProcess::spawn(spec, "engine")
            .map_err(|e| EngineError::Spawn(format!("{}: {e}", spec.program)))?;
        info!(command = %spec.program, "Reasoning engine started");
        Ok(Self {
            name: format!("stdio:{}", spec.program),
            model: model.into(),
            process,
            open_turn: None,
        })
    }

    /// Start the engine described by `[engine]`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let program = config
            .command
            .clone()
            .ok_or_else(|| EngineError::Spawn("engine.command is not set".into()))?;
        let mut spec = ProcessSpec::new(program);
        spec.args = config.args.clone();
        spec.env
            .extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::spawn(&spec, config.model.clone())
    }

    async fn send<T: Serialize>(&mut self, frame: &T) -> Result<(), EngineError> {
        self.process
            .writer
            .send(frame)
            .await
            .map_err(|e| EngineError::Send(e.to_string()))
    }
}

#[async_trait]
impl ReasoningEngine for StdioEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_session(
        &mut self,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> Result<(), EngineError> {
        let model = self.model.clone();
        self.send(&EngineRequest::SessionStart {
            instructions,
            tools,
            model: &model,
        })
        .await?;
        info!(
            model = %model,
            tools = tools.len(),
            instructions_chars = instructions.len(),
            "Engine session started"
        );
        Ok(())
    }

    async fn begin_turn(&mut self, turn_id: u64, input: &TurnInput) -> Result<(), EngineError> {
        self.open_turn = Some(turn_id);
        self.send(&EngineRequest::Turn {
            turn_id,
            input: TurnPayload::from_input(input),
        })
        .await
    }

    async fn next_event(&mut self) -> Result<EngineEvent, EngineError> {
        loop {
            let line = self
                .process
                .reader
                .next_line()
                .await
                .map_err(|e| EngineError::ChannelClosed(e.to_string()))?
                .ok_or_else(|| EngineError::ChannelClosed("engine output ended".into()))?;

            let frame: EngineFrame = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Unparseable engine line skipped");
                    continue;
                }
            };

            if Some(frame.turn_id) != self.open_turn {
                debug!(
                    turn_id = frame.turn_id,
                    open = ?self.open_turn,
                    "Stale engine frame dropped"
                );
                continue;
            }
            if matches!(frame.event, EngineEvent::Done { .. }) {
                self.open_turn = None;
            }
            return Ok(frame.event);
        }
    }

    async fn send_tool_result(
        &mut self,
        call_id: &str,
        outcome: &ToolOutcome,
    ) -> Result<(), EngineError> {
        let Some(turn_id) = self.open_turn else {
            return Err(EngineError::Protocol(format!(
                "tool result for {call_id} outside an open turn"
            )));
        };
        self.send(&EngineRequest::tool_result(turn_id, call_id, outcome))
            .await
    }

    async fn close(&mut self) {
        self.open_turn = None;
        if let Err(e) = self.process.child.start_kill() {
            debug!(error = %e, "Engine process already gone");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use mcbridge_core::ToolFailure;

    fn scripted(script: &str) -> StdioEngine {
        let spec = ProcessSpec::new("sh").arg("-c").arg(script);
        StdioEngine::spawn(&spec, "test-model").unwrap()
    }

    #[tokio::test]
    async fn stale_frames_are_dropped() {
        // Reads the session start and the turn, then answers for an old turn
        // before the open one.
        let mut engine = scripted(
            r#"read -r s; read -r t
echo '{"type":"text","turn_id":1,"text":"late output"}'
echo 'not json'
echo '{"type":"text","turn_id":2,"text":"hello"}'
echo '{"type":"done","turn_id":2,"response":"ok"}'
sleep 5"#,
        );
        engine.start_session("be helpful", &[]).await.unwrap();
        engine.begin_turn(2, &TurnInput::Idle).await.unwrap();

        assert_eq!(
            engine.next_event().await.unwrap(),
            EngineEvent::Text {
                text: "hello".into()
            }
        );
        assert_eq!(
            engine.next_event().await.unwrap(),
            EngineEvent::Done {
                response: Some("ok".into())
            }
        );
        engine.close().await;
    }

    #[tokio::test]
    async fn tool_call_round_trip_through_process() {
        let mut engine = scripted(
            r#"read -r s; read -r t
echo '{"type":"tool_call","turn_id":1,"call_id":"c1","name":"mcp__minecraft__chat","arguments":{"message":"hi"}}'
read -r result
case "$result" in
  *'"call_id":"c1"'*'"error":'*) echo '{"type":"done","turn_id":1,"response":"saw error"}' ;;
  *) echo '{"type":"done","turn_id":1,"response":"unexpected"}' ;;
esac
sleep 5"#,
        );
        engine.start_session("x", &[]).await.unwrap();
        engine.begin_turn(1, &TurnInput::Idle).await.unwrap();

        let EngineEvent::ToolCall { call_id, name, .. } = engine.next_event().await.unwrap() else {
            panic!("Expected tool call");
        };
        assert_eq!(name, "mcp__minecraft__chat");

        let outcome = ToolOutcome::Failure(ToolFailure::ProviderUnavailable {
            provider: "minecraft".into(),
        });
        engine.send_tool_result(&call_id, &outcome).await.unwrap();
        assert_eq!(
            engine.next_event().await.unwrap(),
            EngineEvent::Done {
                response: Some("saw error".into())
            }
        );
        engine.close().await;
    }

    #[tokio::test]
    async fn engine_exit_is_channel_closed() {
        let mut engine = scripted("read -r s; exit 0");
        engine.start_session("x", &[]).await.unwrap();
        // Writing may race the exit; only the read outcome is asserted.
        let _ = engine.begin_turn(1, &TurnInput::Idle).await;
        assert!(matches!(
            engine.next_event().await,
            Err(EngineError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn tool_result_outside_turn_is_protocol_error() {
        let mut engine = scripted("sleep 5");
        let outcome = ToolOutcome::Success(serde_json::Value::Null);
        assert!(matches!(
            engine.send_tool_result("c1", &outcome).await,
            Err(EngineError::Protocol(_))
        ));
        engine.close().await;
    }

    #[test]
    fn missing_command_cannot_start() {
        let config = EngineConfig::default();
        assert!(matches!(
            StdioEngine::from_config(&config),
            Err(EngineError::Spawn(_))
        ));
    }
}
