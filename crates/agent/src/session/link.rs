//! The game link task.
//!
//! Drives a [`ReconnectMachine`] against the game provider: issues the
//! provider's connect operation, listens for disconnect notifications, and
//! sleeps out backoff delays. It is the only writer of the connection state;
//! everyone else reads snapshots from a watch channel.

use mcbridge_capabilities::CapabilityRegistry;
use mcbridge_core::{
    BridgeEvent, ConnectionSnapshot, EventBus, ProviderId, ProviderNotification, ToolFailure,
    ToolInvocation, ToolOutcome,
};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use super::reconnect::{LinkAction, ReconnectMachine};

enum LinkCommand {
    Connect,
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Handle to a running game link. Dropping it stops the task.
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
    snapshots: watch::Receiver<ConnectionSnapshot>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Ask the link to connect. A no-op unless it is Disconnected.
    pub fn connect(&self) {
        let _ = self.commands.send(LinkCommand::Connect);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.snapshots.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshots.clone()
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct GameLink {
    machine: ReconnectMachine,
    registry: Arc<CapabilityRegistry>,
    provider: ProviderId,
    connect_operation: String,
    snapshots: watch::Sender<ConnectionSnapshot>,
    bus: EventBus,
}

impl GameLink {
    /// Start the link task for `provider`. `notifications` carries provider
    /// notifications; only those from `provider` matter here.
    pub fn spawn(
        machine: ReconnectMachine,
        registry: Arc<CapabilityRegistry>,
        provider: ProviderId,
        connect_operation: impl Into<String>,
        notifications: mpsc::UnboundedReceiver<ProviderNotification>,
        bus: EventBus,
    ) -> LinkHandle {
        let (snap_tx, snap_rx) = watch::channel(machine.snapshot());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let link = Self {
            machine,
            registry,
            provider,
            connect_operation: connect_operation.into(),
            snapshots: snap_tx,
            bus,
        };
        let task = tokio::spawn(link.run(cmd_rx, notifications));
        LinkHandle {
            commands: cmd_tx,
            snapshots: snap_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LinkCommand>,
        mut notifications: mpsc::UnboundedReceiver<ProviderNotification>,
    ) {
        let mut retry: Option<Pin<Box<Sleep>>> = None;
        let mut notifications_open = true;

        loop {
            let action = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(LinkCommand::Connect) => self.machine.connect(),
                    None => break,
                },
                note = notifications.recv(), if notifications_open => match note {
                    Some(note) if note.provider == self.provider && note.is_disconnect() => {
                        warn!(provider = %note.provider, event = %note.event, "Game connection lost");
                        self.machine.disconnected()
                    }
                    Some(note) => {
                        debug!(provider = %note.provider, event = %note.event, "Provider notification");
                        continue;
                    }
                    None => {
                        notifications_open = false;
                        continue;
                    }
                },
                _ = wait_retry(&mut retry), if retry.is_some() => {
                    retry = None;
                    self.machine.retry_elapsed()
                }
            };

            let mut action = self.apply(action);
            // Connect attempts resolve immediately into the next action.
            while action == LinkAction::Connect {
                let next = if self.attempt_connect().await {
                    self.machine.connect_succeeded()
                } else {
                    self.machine.connect_failed()
                };
                action = self.apply(next);
            }

            match action {
                LinkAction::ScheduleRetry(delay) => {
                    info!(
                        attempt = self.machine.backoff().attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnect scheduled"
                    );
                    retry = Some(Box::pin(tokio::time::sleep(delay)));
                }
                LinkAction::Fatal => {
                    error!("Game connection lost and reconnect is disabled");
                    break;
                }
                LinkAction::None | LinkAction::Connect => {}
            }
        }
        debug!("Game link stopped");
    }

    /// Publish the new state and unwrap the machine's verdict.
    fn apply(
        &mut self,
        result: Result<LinkAction, mcbridge_core::error::SessionError>,
    ) -> LinkAction {
        let action = match result {
            Ok(action) => action,
            Err(e) => {
                error!(error = %e, "Game link state error");
                LinkAction::None
            }
        };

        let snapshot = self.machine.snapshot();
        let changed = self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        if changed {
            info!(state = %snapshot.state, attempt = snapshot.backoff.attempt, "Game connection state");
            self.bus.publish(BridgeEvent::ConnectionChanged {
                state: snapshot.state,
                attempt: snapshot.backoff.attempt,
                timestamp: chrono::Utc::now(),
            });
        }
        action
    }

    /// Run the provider's connect operation once. An attempt that outlives
    /// the policy's connect timeout counts as failed.
    async fn attempt_connect(&self) -> bool {
        if !self.registry.is_available(&self.provider) {
            self.registry.revive().await;
        }

        let invocation = ToolInvocation::new(
            self.provider.clone(),
            self.connect_operation.clone(),
            serde_json::json!({}),
        );
        let timeout = self.machine.policy().connect_timeout;
        let Ok(result) = tokio::time::timeout(timeout, self.registry.invoke(&invocation)).await
        else {
            warn!(
                provider = %self.provider,
                timeout_ms = timeout.as_millis() as u64,
                "Connect attempt timed out"
            );
            return false;
        };
        match result.outcome {
            ToolOutcome::Success(_) => true,
            // A provider without a connect operation manages the link itself.
            ToolOutcome::Failure(ToolFailure::UnknownOperation { .. }) => {
                debug!(provider = %self.provider, "No connect operation; provider connects on its own");
                true
            }
            ToolOutcome::Failure(failure) => {
                warn!(provider = %self.provider, reason = %failure, "Connect attempt failed");
                false
            }
        }
    }
}
