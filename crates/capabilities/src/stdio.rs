//! Capability provider reached over a child process's stdio.
//!
//! The provider process is spawned, must advertise its catalog within the
//! handshake timeout, and is then driven with correlated requests. A reader
//! task owns stdout: it routes responses to waiting callers through a
//! correlation table and forwards notifications.
//!
//! Every call resolves exactly once. When stdout closes, every waiting call
//! resolves as `ProviderUnavailable`. When a caller gives up (its future is
//! dropped, e.g. on turn timeout), its correlation entry is removed and a
//! late response is discarded.

use async_trait::async_trait;
use mcbridge_core::error::CapabilityError;
use mcbridge_core::process::{LineProcess, LineReader, LineWriter, ProcessSpec};
use mcbridge_core::{
    OperationDescriptor, ProviderChannel, ProviderId, ProviderNotification, ToolFailure,
    ToolInvocation, ToolOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{BridgeFrame, ProviderFrame, response_outcome};

type PendingMap = HashMap<String, oneshot::Sender<ToolOutcome>>;

/// Correlation table plus the liveness flag, guarded together so a call can
/// never be registered after the table was drained.
#[derive(Default)]
struct Correlations {
    alive: bool,
    pending: PendingMap,
}

pub struct StdioProvider {
    id: ProviderId,
    catalog: Vec<OperationDescriptor>,
    writer: tokio::sync::Mutex<LineWriter>,
    state: Arc<Mutex<Correlations>>,
    closing: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Child>,
    reader: JoinHandle<()>,
}

impl StdioProvider {
    /// Spawn the provider and wait for its catalog.
    pub async fn connect(
        id: ProviderId,
        spec: &ProcessSpec,
        handshake_timeout: Duration,
        notifications: mpsc::UnboundedSender<ProviderNotification>,
    ) -> Result<Self, CapabilityError> {
        let LineProcess {
            child,
            writer,
            mut reader,
        } = LineProcess::spawn(spec, id.as_str()).map_err(|e| CapabilityError::Spawn {
            provider: id.to_string(),
            reason: format!("{}: {e}", spec.program),
        })?;

        let catalog = tokio::time::timeout(
            handshake_timeout,
            read_catalog(&id, &mut reader, &notifications),
        )
        .await
        .map_err(|_| CapabilityError::Handshake {
            provider: id.to_string(),
            reason: format!("no catalog within {}s", handshake_timeout.as_secs_f32()),
        })??;

        info!(
            provider = %id,
            operations = catalog.len(),
            "Capability provider connected"
        );

        let state = Arc::new(Mutex::new(Correlations {
            alive: true,
            pending: HashMap::new(),
        }));
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            id.clone(),
            reader,
            state.clone(),
            closing.clone(),
            notifications,
        ));

        Ok(Self {
            id,
            catalog,
            writer: tokio::sync::Mutex::new(writer),
            state,
            closing,
            child: tokio::sync::Mutex::new(child),
            reader,
        })
    }

    fn unavailable(&self) -> ToolOutcome {
        ToolOutcome::Failure(ToolFailure::ProviderUnavailable {
            provider: self.id.to_string(),
        })
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }
}

async fn read_catalog(
    id: &ProviderId,
    reader: &mut LineReader,
    notifications: &mpsc::UnboundedSender<ProviderNotification>,
) -> Result<Vec<OperationDescriptor>, CapabilityError> {
    loop {
        let line = reader
            .next_line()
            .await
            .map_err(|e| CapabilityError::Handshake {
                provider: id.to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CapabilityError::Handshake {
                provider: id.to_string(),
                reason: "exited before advertising its catalog".into(),
            })?;

        match ProviderFrame::parse(&line) {
            Ok(ProviderFrame::Catalog { operations }) => return Ok(operations),
            Ok(ProviderFrame::Notification { event, detail }) => {
                let _ = notifications.send(ProviderNotification {
                    provider: id.clone(),
                    event,
                    detail,
                });
            }
            Ok(ProviderFrame::Response { correlation_id, .. }) => {
                debug!(provider = %id, %correlation_id, "Response before catalog ignored");
            }
            Err(e) => warn!(provider = %id, error = %e, "Unparseable provider line skipped"),
        }
    }
}

async fn read_loop(
    id: ProviderId,
    mut reader: LineReader,
    state: Arc<Mutex<Correlations>>,
    closing: Arc<AtomicBool>,
    notifications: mpsc::UnboundedSender<ProviderNotification>,
) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(provider = %id, error = %e, "Provider output unreadable");
                break;
            }
        };

        match ProviderFrame::parse(&line) {
            Ok(ProviderFrame::Response {
                correlation_id,
                ok,
                error,
            }) => {
                let waiter = state
                    .lock()
                    .ok()
                    .and_then(|mut s| s.pending.remove(&correlation_id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response_outcome(ok, error));
                    }
                    None => {
                        debug!(provider = %id, %correlation_id, "Late response discarded");
                    }
                }
            }
            Ok(ProviderFrame::Notification { event, detail }) => {
                debug!(provider = %id, %event, "Provider notification");
                let _ = notifications.send(ProviderNotification {
                    provider: id.clone(),
                    event,
                    detail,
                });
            }
            Ok(ProviderFrame::Catalog { .. }) => {
                debug!(provider = %id, "Repeated catalog ignored");
            }
            Err(e) => warn!(provider = %id, error = %e, "Unparseable provider line skipped"),
        }
    }

    let drained = drain(&id, &state);
    if closing.load(Ordering::SeqCst) {
        debug!(provider = %id, "Provider channel closed");
    } else {
        warn!(provider = %id, pending = drained, "Capability provider exited");
        let _ = notifications.send(ProviderNotification {
            provider: id.clone(),
            event: "provider_exited".into(),
            detail: serde_json::Value::Null,
        });
    }
}

/// Mark the channel dead and fail every waiting call. Returns how many
/// calls were waiting.
fn drain(id: &ProviderId, state: &Mutex<Correlations>) -> usize {
    let pending = match state.lock() {
        Ok(mut s) => {
            s.alive = false;
            std::mem::take(&mut s.pending)
        }
        Err(_) => return 0,
    };
    let count = pending.len();
    for (_, tx) in pending {
        let _ = tx.send(ToolOutcome::Failure(ToolFailure::ProviderUnavailable {
            provider: id.to_string(),
        }));
    }
    count
}

/// Removes a correlation entry when the call ends, however it ends.
struct PendingGuard<'a> {
    state: &'a Mutex<Correlations>,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut s) = self.state.lock() {
            s.pending.remove(self.correlation_id);
        }
    }
}

#[async_trait]
impl ProviderChannel for StdioProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn catalog(&self) -> Vec<OperationDescriptor> {
        self.catalog.clone()
    }

    fn is_alive(&self) -> bool {
        self.state.lock().map(|s| s.alive).unwrap_or(false)
    }

    async fn call(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let (tx, rx) = oneshot::channel();
        {
            let Ok(mut s) = self.state.lock() else {
                return self.unavailable();
            };
            if !s.alive {
                return self.unavailable();
            }
            s.pending.insert(invocation.correlation_id.clone(), tx);
        }
        let _guard = PendingGuard {
            state: &self.state,
            correlation_id: &invocation.correlation_id,
        };

        let frame = BridgeFrame::Request {
            correlation_id: &invocation.correlation_id,
            operation: &invocation.operation,
            arguments: &invocation.arguments,
        };
        if let Err(e) = self.writer.lock().await.send(&frame).await {
            warn!(provider = %self.id, error = %e, "Failed to send request");
            return self.unavailable();
        }

        rx.await.unwrap_or_else(|_| self.unavailable())
    }

    async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        drain(&self.id, &self.state);
        if let Err(e) = self.child.lock().await.start_kill() {
            debug!(provider = %self.id, error = %e, "Provider already gone");
        }
    }
}

impl Drop for StdioProvider {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
