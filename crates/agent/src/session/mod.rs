//! Session controller — sole owner of the reasoning engine channel and of the
//! game link.
//!
//! The turn dispatcher reaches the engine only through the methods here. The
//! game connection state is written only by the link task and read by
//! everyone else as snapshots.

pub mod link;
pub mod reconnect;

use mcbridge_core::error::EngineError;
use mcbridge_core::{
    ConnectionSnapshot, EngineEvent, ReasoningEngine, ToolDefinition, ToolOutcome, TurnInput,
};
use tokio::sync::watch;
use tracing::info;

pub use link::{GameLink, LinkHandle};
pub use reconnect::{BackoffPolicy, LinkAction, ReconnectMachine};

pub struct SessionController {
    engine: Box<dyn ReasoningEngine>,
    link: Option<LinkHandle>,
    /// Snapshot source when there is no game provider
    idle_snapshots: watch::Receiver<ConnectionSnapshot>,
}

impl SessionController {
    pub fn new(engine: Box<dyn ReasoningEngine>, link: Option<LinkHandle>) -> Self {
        let (_tx, idle_snapshots) = watch::channel(ConnectionSnapshot::default());
        Self {
            engine,
            link,
            idle_snapshots,
        }
    }

    /// Open the engine session with the instructions document and the tool
    /// catalog, then start connecting the game link.
    pub async fn start(
        &mut self,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> Result<(), EngineError> {
        info!(engine = %self.engine.name(), tools = tools.len(), "Starting engine session");
        self.engine.start_session(instructions, tools).await?;
        self.connect_game();
        Ok(())
    }

    /// Ask the game link to connect. Idempotent.
    pub fn connect_game(&self) {
        if let Some(link) = &self.link {
            link.connect();
        }
    }

    pub fn connection(&self) -> ConnectionSnapshot {
        match &self.link {
            Some(link) => link.snapshot(),
            None => *self.idle_snapshots.borrow(),
        }
    }

    /// Snapshots of the game link. With no game provider the channel never
    /// changes and reports closed.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionSnapshot> {
        match &self.link {
            Some(link) => link.subscribe(),
            None => self.idle_snapshots.clone(),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub(crate) async fn begin_turn(
        &mut self,
        turn_id: u64,
        input: &TurnInput,
    ) -> Result<(), EngineError> {
        self.engine.begin_turn(turn_id, input).await
    }

    pub(crate) async fn next_event(&mut self) -> Result<EngineEvent, EngineError> {
        self.engine.next_event().await
    }

    pub(crate) async fn send_tool_result(
        &mut self,
        call_id: &str,
        outcome: &ToolOutcome,
    ) -> Result<(), EngineError> {
        self.engine.send_tool_result(call_id, outcome).await
    }

    /// Close the engine channel and stop the game link.
    pub async fn shutdown(mut self) {
        self.engine.close().await;
        self.link.take();
        info!("Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, ScriptedProvider};
    use mcbridge_capabilities::CapabilityRegistry;
    use mcbridge_core::{BridgeEvent, ConnectionState, EventBus, ProviderId, ProviderNotification};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn connection_states(
        rx: &mut tokio::sync::broadcast::Receiver<Arc<BridgeEvent>>,
    ) -> Vec<(ConnectionState, u32)> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BridgeEvent::ConnectionChanged { state, attempt, .. } = event.as_ref() {
                states.push((*state, *attempt));
            }
        }
        states
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drop_while_connected_reconnects_after_first_delay() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let provider = ScriptedProvider::new("minecraft", &["connect", "chat"]);
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(provider.clone()));

        let (note_tx, note_rx) = mpsc::unbounded_channel();
        let link = GameLink::spawn(
            ReconnectMachine::new(BackoffPolicy::default()),
            registry,
            ProviderId::new("minecraft"),
            "connect",
            note_rx,
            bus.clone(),
        );
        let (engine, _probe) = ScriptedEngine::new(vec![]);
        let mut session = SessionController::new(Box::new(engine), Some(link));
        session.start("instructions", &[]).await.unwrap();
        settle().await;
        assert_eq!(session.connection().state, ConnectionState::Connected);
        connection_states(&mut events);

        note_tx
            .send(ProviderNotification {
                provider: ProviderId::new("minecraft"),
                event: "disconnected".into(),
                detail: serde_json::Value::Null,
            })
            .unwrap();
        settle().await;
        assert_eq!(session.connection().state, ConnectionState::Reconnecting);
        assert_eq!(session.connection().backoff.next_delay, Duration::from_millis(5000));

        // Nothing happens before the first backoff delay.
        tokio::time::sleep(Duration::from_millis(4900)).await;
        settle().await;
        assert_eq!(session.connection().state, ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(session.connection().state, ConnectionState::Connected);

        assert_eq!(
            connection_states(&mut events),
            vec![
                (ConnectionState::Reconnecting, 1),
                (ConnectionState::Connecting, 1),
                (ConnectionState::Connected, 0),
            ]
        );
        assert_eq!(provider.calls_to("connect"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_connects_back_off() {
        let bus = EventBus::default();
        let provider = ScriptedProvider::new("minecraft", &["connect"]).fail_first("connect", 2);
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(provider.clone()));

        let (_note_tx, note_rx) = mpsc::unbounded_channel();
        let link = GameLink::spawn(
            ReconnectMachine::new(BackoffPolicy::default()),
            registry,
            ProviderId::new("minecraft"),
            "connect",
            note_rx,
            bus,
        );
        link.connect();
        settle().await;
        assert_eq!(link.snapshot().state, ConnectionState::Reconnecting);
        assert_eq!(link.snapshot().backoff.attempt, 1);

        tokio::time::sleep(Duration::from_millis(5001)).await;
        settle().await;
        assert_eq!(link.snapshot().backoff.attempt, 2);
        assert_eq!(link.snapshot().backoff.next_delay, Duration::from_millis(10_000));

        tokio::time::sleep(Duration::from_millis(10_001)).await;
        settle().await;
        assert_eq!(link.snapshot().state, ConnectionState::Connected);
        assert_eq!(link.snapshot().backoff.attempt, 0);
        assert_eq!(provider.calls_to("connect"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_times_out_into_backoff() {
        let provider = ScriptedProvider::new("minecraft", &["connect"])
            .slow("connect", Duration::from_secs(365 * 24 * 3600));
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(provider.clone()));

        let (_note_tx, note_rx) = mpsc::unbounded_channel();
        let link = GameLink::spawn(
            ReconnectMachine::new(BackoffPolicy {
                connect_timeout: Duration::from_secs(2),
                ..BackoffPolicy::default()
            }),
            registry,
            ProviderId::new("minecraft"),
            "connect",
            note_rx,
            EventBus::default(),
        );
        link.connect();
        settle().await;
        assert_eq!(link.snapshot().state, ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;
        assert_eq!(link.snapshot().state, ConnectionState::Reconnecting);
        assert_eq!(link.snapshot().backoff.attempt, 1);
        assert_eq!(link.snapshot().backoff.next_delay, Duration::from_millis(5000));

        // The retry hangs too and times out in turn.
        tokio::time::sleep(Duration::from_millis(7000)).await;
        settle().await;
        assert_eq!(link.snapshot().backoff.attempt, 2);
        assert_eq!(provider.calls_to("connect"), 2);
    }

    #[tokio::test]
    async fn disabled_reconnect_surfaces_terminal_snapshot() {
        let provider = ScriptedProvider::new("minecraft", &["connect"]);
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(provider));

        let (note_tx, note_rx) = mpsc::unbounded_channel();
        let link = GameLink::spawn(
            ReconnectMachine::new(BackoffPolicy {
                enabled: false,
                ..BackoffPolicy::default()
            }),
            registry,
            ProviderId::new("minecraft"),
            "connect",
            note_rx,
            EventBus::default(),
        );
        let mut snapshots = link.subscribe();
        link.connect();
        settle().await;
        assert_eq!(link.snapshot().state, ConnectionState::Connected);

        note_tx
            .send(ProviderNotification {
                provider: ProviderId::new("minecraft"),
                event: "kicked".into(),
                detail: serde_json::json!("server closed"),
            })
            .unwrap();

        loop {
            snapshots.changed().await.unwrap();
            if snapshots.borrow().terminal {
                break;
            }
        }
        assert_eq!(link.snapshot().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn no_game_provider_reports_disconnected() {
        let (engine, _probe) = ScriptedEngine::new(vec![]);
        let session = SessionController::new(Box::new(engine), None);
        assert_eq!(session.connection().state, ConnectionState::Disconnected);
        assert!(!session.connection().terminal);
    }
}
