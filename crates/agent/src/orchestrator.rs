//! The orchestrator loop.
//!
//! One task owns the batcher, the pending-input queue and the session. It
//! waits on whichever comes first: a feed event, the batch quiet period, the
//! idle tick, the running turn finishing, a game-link change, or shutdown.
//! At most one turn runs at a time; input arriving meanwhile is coalesced and
//! runs as the next turn.

use futures::future::BoxFuture;
use mcbridge_capabilities::{CapabilityRegistry, SessionStatusProvider, launches_from_config};
use mcbridge_config::AppConfig;
use mcbridge_core::error::{EngineError, Error, FeedError, SessionError};
use mcbridge_core::{
    BridgeEvent, DomainEvent, EventBatch, EventBus, InstructionPaths, ProviderId,
    SystemInstructions, TurnInput,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::batcher::{EventBatcher, policy_from_config};
use crate::dispatcher::{TurnDispatcher, TurnReport};
use crate::session::{BackoffPolicy, GameLink, ReconnectMachine, SessionController};

type InFlight = BoxFuture<'static, (SessionController, Result<TurnReport, EngineError>)>;

/// Input waiting for the next turn.
#[derive(Debug, Default)]
struct PendingInput {
    startup: Option<String>,
    batch: Option<EventBatch>,
    idle: bool,
}

impl PendingInput {
    /// Relevant batches released while a turn runs merge in release order.
    fn push_batch(&mut self, batch: EventBatch) {
        match &mut self.batch {
            Some(existing) => existing.absorb(batch),
            None => self.batch = Some(batch),
        }
    }

    /// Startup first, then batches. A pending idle tick is superseded by a
    /// batch.
    fn take(&mut self) -> Option<TurnInput> {
        if let Some(prompt) = self.startup.take() {
            return Some(TurnInput::Startup { prompt });
        }
        if let Some(batch) = self.batch.take() {
            self.idle = false;
            return Some(TurnInput::batch(batch));
        }
        if std::mem::take(&mut self.idle) {
            return Some(TurnInput::Idle);
        }
        None
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn wait_turn(
    in_flight: &mut Option<InFlight>,
) -> (SessionController, Result<TurnReport, EngineError>) {
    match in_flight {
        Some(turn) => turn.as_mut().await,
        None => std::future::pending().await,
    }
}

pub struct Orchestrator {
    session: SessionController,
    dispatcher: TurnDispatcher,
    batcher: EventBatcher,
    bus: EventBus,
    instructions: String,
    startup_prompt: Option<String>,
    idle_tick: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        session: SessionController,
        dispatcher: TurnDispatcher,
        batcher: EventBatcher,
        bus: EventBus,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            session,
            dispatcher,
            batcher,
            bus,
            instructions: instructions.into(),
            startup_prompt: None,
            idle_tick: None,
        }
    }

    /// Run a first turn with `prompt` once the session starts.
    pub fn with_startup_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.startup_prompt = Some(prompt.into());
        self
    }

    /// Run an idle turn after `interval` without a turn or relevant batch.
    pub fn with_idle_tick(mut self, interval: Duration) -> Self {
        self.idle_tick = Some(interval);
        self
    }

    /// Assemble everything from configuration: providers, the game link, the
    /// engine process and the batcher.
    pub async fn from_config(config: &AppConfig, bus: EventBus) -> Result<Self, Error> {
        let registry = Arc::new(CapabilityRegistry::new());
        let notifications = registry.take_notifications();
        registry.start_all(launches_from_config(config)).await?;

        let link = match (config.game_provider(), notifications) {
            (Some((id, provider)), Some(notifications)) => Some(GameLink::spawn(
                ReconnectMachine::new(BackoffPolicy::from_config(&config.reconnect)),
                registry.clone(),
                ProviderId::new(id),
                provider.connect_operation.clone(),
                notifications,
                bus.clone(),
            )),
            _ => {
                warn!("No game provider configured; game connection is not managed");
                None
            }
        };

        let engine = mcbridge_engine::StdioEngine::from_config(&config.engine)?;
        let session = SessionController::new(Box::new(engine), link);
        registry.register(Arc::new(SessionStatusProvider::new(
            session.subscribe_connection(),
        )));

        let instructions = SystemInstructions::load(&InstructionPaths {
            prompts_dir: Some(config.instructions.prompts_dir.clone()),
            docs_dir: Some(config.instructions.docs_dir.clone()),
        });
        info!(
            files = instructions.loaded_files.len(),
            tokens = instructions.estimated_tokens(),
            "System instructions composed"
        );

        let batcher = EventBatcher::new(
            Duration::from_millis(config.batching.message_batch_delay_ms),
            policy_from_config(&config.relevance, &config.self_names()),
        );
        let dispatcher = TurnDispatcher::new(
            registry,
            bus.clone(),
            Duration::from_secs(config.engine.turn_timeout_secs),
        );

        let mut orchestrator = Self::new(session, dispatcher, batcher, bus, instructions.text);
        if !config.engine.startup_prompt.trim().is_empty() {
            orchestrator = orchestrator.with_startup_prompt(config.engine.startup_prompt.clone());
        }
        if config.batching.idle_tick_secs > 0 {
            orchestrator =
                orchestrator.with_idle_tick(Duration::from_secs(config.batching.idle_tick_secs));
        }
        Ok(orchestrator)
    }

    /// Start the session and process input until shutdown or a fatal error.
    ///
    /// Fatal: the engine channel breaks, the feed ends, or the game link is
    /// lost with reconnect disabled. A `true` on `shutdown` (or its sender
    /// going away) stops the loop cleanly. Whenever the loop stops, a running
    /// turn is cancelled and closed before the session shuts down.
    pub async fn run(
        self,
        mut feed: mpsc::Receiver<DomainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Error> {
        let Self {
            mut session,
            dispatcher,
            mut batcher,
            bus,
            instructions,
            startup_prompt,
            idle_tick,
        } = self;

        let tools = dispatcher.registry().definitions();
        session.start(&instructions, &tools).await?;
        info!(
            tools = tools.len(),
            providers = dispatcher.registry().provider_ids().len(),
            "Orchestrator running"
        );

        let mut connection = session.subscribe_connection();
        let mut connection_open = true;
        let mut pending = PendingInput {
            startup: startup_prompt,
            ..Default::default()
        };
        let restart_idle = || idle_tick.map(|interval| Instant::now() + interval);
        let mut idle_deadline = restart_idle();
        let mut next_turn_id: u64 = 1;
        let mut idle_session = Some(session);
        let mut in_flight: Option<InFlight> = None;
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let result: Result<(), Error> = loop {
            if in_flight.is_none()
                && let Some(mut session) = idle_session.take()
            {
                match pending.take() {
                    Some(input) => {
                        let turn_id = next_turn_id;
                        next_turn_id += 1;
                        let dispatcher = dispatcher.clone();
                        let mut cancel = cancel_rx.clone();
                        in_flight = Some(Box::pin(async move {
                            let revived = dispatcher.registry().revive().await;
                            if revived > 0 {
                                info!(revived, "Providers revived before turn");
                            }
                            let cancelled = async move {
                                let _ = cancel.wait_for(|stop| *stop).await;
                            };
                            let result = dispatcher
                                .run_turn_until(&mut session, turn_id, input, cancelled)
                                .await;
                            (session, result)
                        }));
                    }
                    None => idle_session = Some(session),
                }
            }

            let batch_deadline = batcher.deadline();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break Ok(());
                    }
                }

                event = feed.recv() => match event {
                    Some(event) => {
                        debug!(event = %event.render(), "Feed event");
                        batcher.submit(event, Instant::now());
                    }
                    None => {
                        error!("Event feed ended");
                        break Err(FeedError::Read("event feed closed".into()).into());
                    }
                },

                _ = wait_until(batch_deadline), if batch_deadline.is_some() => {
                    if let Some(batch) = batcher.on_timer_fire(Instant::now()) {
                        bus.publish(BridgeEvent::BatchReleased {
                            events: batch.len(),
                            relevant: batch.relevant,
                            timestamp: chrono::Utc::now(),
                        });
                        if batch.relevant {
                            info!(events = batch.len(), busy = in_flight.is_some(), "Relevant batch queued");
                            pending.push_batch(batch);
                            idle_deadline = restart_idle();
                        } else {
                            debug!(events = batch.len(), "Batch not relevant, discarded");
                        }
                    }
                }

                _ = wait_until(idle_deadline), if idle_deadline.is_some() => {
                    idle_deadline = None;
                    debug!(busy = in_flight.is_some(), "Idle tick");
                    pending.idle = true;
                }

                (session, result) = wait_turn(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    idle_session = Some(session);
                    match result {
                        Ok(report) => info!(
                            turn_id = report.turn.id,
                            invocations = report.turn.invocations().len(),
                            timed_out = report.timed_out,
                            duration_ms = report.duration.as_millis() as u64,
                            "Turn closed"
                        ),
                        Err(e) => {
                            error!(error = %e, "Engine channel lost");
                            break Err(e.into());
                        }
                    }
                    idle_deadline = restart_idle();
                }

                changed = connection.changed(), if connection_open => {
                    if changed.is_err() {
                        connection_open = false;
                    }
                    let snapshot = *connection.borrow_and_update();
                    if snapshot.terminal {
                        break Err(SessionError::ReconnectDisabled(
                            "game connection lost and reconnect is disabled".into(),
                        )
                        .into());
                    }
                }
            }
        };

        if let Some(turn) = in_flight.take() {
            warn!("Cancelling turn in progress");
            let _ = cancel_tx.send(true);
            let (session, closed) = turn.await;
            if let Ok(report) = closed {
                info!(
                    turn_id = report.turn.id,
                    cancelled = report.cancelled,
                    "Turn closed on stop"
                );
            }
            idle_session = Some(session);
        }
        if let Some(session) = idle_session {
            session.shutdown().await;
        }
        dispatcher.registry().shutdown_all().await;
        info!("Orchestrator stopped");
        result
    }
}
