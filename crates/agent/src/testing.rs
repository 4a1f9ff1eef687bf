//! Scripted stand-ins for the reasoning engine and capability providers.
//!
//! Used by this crate's tests and, through the `testing` feature, by the
//! CLI's end-to-end tests.

use async_trait::async_trait;
use mcbridge_core::error::EngineError;
use mcbridge_core::{
    EngineEvent, OperationDescriptor, ProviderChannel, ProviderId, ReasoningEngine,
    ToolDefinition, ToolFailure, ToolInvocation, ToolOutcome, TurnInput,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted engine action within a turn.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Call {
        name: String,
        args: serde_json::Value,
    },
    Done(Option<String>),
    /// Never produce another event.
    Hang,
    /// The channel breaks.
    Fail,
}

impl Step {
    pub fn text(text: &str) -> Self {
        Self::Text(text.into())
    }

    pub fn call(name: &str, args: serde_json::Value) -> Self {
        Self::Call {
            name: name.into(),
            args,
        }
    }

    pub fn done(response: &str) -> Self {
        Self::Done(Some(response.into()))
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    instructions: Option<String>,
    tools: Vec<String>,
    turns: Vec<(u64, TurnInput)>,
    tool_results: Vec<(String, ToolOutcome)>,
    closed: bool,
}

/// Read-only view of what a [`ScriptedEngine`] was sent.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl EngineProbe {
    pub fn instructions(&self) -> Option<String> {
        self.state.lock().unwrap().instructions.clone()
    }

    pub fn tools(&self) -> Vec<String> {
        self.state.lock().unwrap().tools.clone()
    }

    /// Every turn begun, in order.
    pub fn turns(&self) -> Vec<(u64, TurnInput)> {
        self.state.lock().unwrap().turns.clone()
    }

    pub fn tool_results(&self) -> Vec<(String, ToolOutcome)> {
        self.state.lock().unwrap().tool_results.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// An engine that plays back one script per turn. Turns beyond the scripts
/// complete immediately with no response.
pub struct ScriptedEngine {
    scripts: VecDeque<Vec<Step>>,
    current: VecDeque<Step>,
    next_call: u32,
    probe: EngineProbe,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<Vec<Step>>) -> (Self, EngineProbe) {
        let probe = EngineProbe::default();
        let engine = Self {
            scripts: scripts.into(),
            current: VecDeque::new(),
            next_call: 0,
            probe: probe.clone(),
        };
        (engine, probe)
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start_session(
        &mut self,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> Result<(), EngineError> {
        let mut state = self.probe.state.lock().unwrap();
        state.instructions = Some(instructions.to_string());
        state.tools = tools.iter().map(|t| t.name.clone()).collect();
        Ok(())
    }

    async fn begin_turn(&mut self, turn_id: u64, input: &TurnInput) -> Result<(), EngineError> {
        self.probe
            .state
            .lock()
            .unwrap()
            .turns
            .push((turn_id, input.clone()));
        self.current = self.scripts.pop_front().unwrap_or_default().into();
        Ok(())
    }

    async fn next_event(&mut self) -> Result<EngineEvent, EngineError> {
        match self.current.pop_front() {
            None | Some(Step::Done(None)) => Ok(EngineEvent::Done { response: None }),
            Some(Step::Done(response)) => Ok(EngineEvent::Done { response }),
            Some(Step::Text(text)) => Ok(EngineEvent::Text { text }),
            Some(Step::Call { name, args }) => {
                self.next_call += 1;
                Ok(EngineEvent::ToolCall {
                    call_id: format!("call-{}", self.next_call),
                    name,
                    arguments: args,
                })
            }
            Some(Step::Hang) => std::future::pending::<Result<EngineEvent, EngineError>>().await,
            Some(Step::Fail) => Err(EngineError::ChannelClosed("scripted failure".into())),
        }
    }

    async fn send_tool_result(
        &mut self,
        call_id: &str,
        outcome: &ToolOutcome,
    ) -> Result<(), EngineError> {
        self.probe
            .state
            .lock()
            .unwrap()
            .tool_results
            .push((call_id.to_string(), outcome.clone()));
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.state.lock().unwrap().closed = true;
    }
}

type Handler = dyn Fn(&ToolInvocation) -> ToolOutcome + Send + Sync;

struct ProviderState {
    id: ProviderId,
    catalog: Vec<OperationDescriptor>,
    alive: AtomicBool,
    calls: Mutex<Vec<ToolInvocation>>,
    failures_left: Mutex<HashMap<String, usize>>,
    delay: Mutex<HashMap<String, Duration>>,
    handler: Mutex<Option<Arc<Handler>>>,
}

/// An in-process provider answering from a closure. Clones share state.
#[derive(Clone)]
pub struct ScriptedProvider {
    inner: Arc<ProviderState>,
}

impl ScriptedProvider {
    pub fn new(id: &str, operations: &[&str]) -> Self {
        Self {
            inner: Arc::new(ProviderState {
                id: ProviderId::new(id),
                catalog: operations
                    .iter()
                    .map(|op| OperationDescriptor::new(*op, format!("{op} (scripted)")))
                    .collect(),
                alive: AtomicBool::new(true),
                calls: Mutex::new(Vec::new()),
                failures_left: Mutex::new(HashMap::new()),
                delay: Mutex::new(HashMap::new()),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Answer with `handler` instead of echoing the arguments.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&ToolInvocation) -> ToolOutcome + Send + Sync + 'static,
    {
        *self.inner.handler.lock().unwrap() = Some(Arc::new(handler));
        self
    }

    /// Reject the first `count` calls to `operation`.
    pub fn fail_first(self, operation: &str, count: usize) -> Self {
        self.inner
            .failures_left
            .lock()
            .unwrap()
            .insert(operation.to_string(), count);
        self
    }

    /// Take `delay` to answer calls to `operation`.
    pub fn slow(self, operation: &str, delay: Duration) -> Self {
        self.inner
            .delay
            .lock()
            .unwrap()
            .insert(operation.to_string(), delay);
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.inner.alive.store(alive, Ordering::SeqCst);
    }

    /// Every call received, in order.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

#[async_trait]
impl ProviderChannel for ScriptedProvider {
    fn id(&self) -> &ProviderId {
        &self.inner.id
    }

    fn catalog(&self) -> Vec<OperationDescriptor> {
        self.inner.catalog.clone()
    }

    fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    async fn call(&self, invocation: &ToolInvocation) -> ToolOutcome {
        self.inner.calls.lock().unwrap().push(invocation.clone());

        let delay = self
            .inner
            .delay
            .lock()
            .unwrap()
            .get(&invocation.operation)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reject = {
            let mut failures = self.inner.failures_left.lock().unwrap();
            match failures.get_mut(&invocation.operation) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if reject {
            return ToolOutcome::Failure(ToolFailure::Rejected {
                reason: format!("{} failed (scripted)", invocation.operation),
            });
        }

        let handler = self.inner.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(invocation),
            None => ToolOutcome::Success(serde_json::json!({
                "operation": invocation.operation,
                "arguments": invocation.arguments,
            })),
        }
    }

    async fn shutdown(&self) {
        self.set_alive(false);
    }
}
