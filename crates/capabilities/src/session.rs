//! In-process `session` provider.
//!
//! Lets the engine read the game link's state through the ordinary tool path
//! instead of guessing from failed actions.

use async_trait::async_trait;
use mcbridge_core::{
    ConnectionSnapshot, OperationDescriptor, ProviderChannel, ProviderId, ToolFailure,
    ToolInvocation, ToolOutcome,
};
use tokio::sync::watch;

pub const SESSION_PROVIDER: &str = "session";
pub const CONNECTION_STATUS_OP: &str = "get_connection_status";

pub struct SessionStatusProvider {
    id: ProviderId,
    snapshots: watch::Receiver<ConnectionSnapshot>,
}

impl SessionStatusProvider {
    pub fn new(snapshots: watch::Receiver<ConnectionSnapshot>) -> Self {
        Self {
            id: ProviderId::new(SESSION_PROVIDER),
            snapshots,
        }
    }
}

#[async_trait]
impl ProviderChannel for SessionStatusProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn catalog(&self) -> Vec<OperationDescriptor> {
        vec![OperationDescriptor::new(
            CONNECTION_STATUS_OP,
            "Current state of the bot's connection to the game server, with the \
             reconnect attempt count and the delay before the next attempt.",
        )]
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn call(&self, invocation: &ToolInvocation) -> ToolOutcome {
        if invocation.operation != CONNECTION_STATUS_OP {
            return ToolOutcome::Failure(ToolFailure::UnknownOperation {
                provider: self.id.to_string(),
                operation: invocation.operation.clone(),
            });
        }
        let snapshot = *self.snapshots.borrow();
        match serde_json::to_value(&snapshot) {
            Ok(value) => ToolOutcome::Success(value),
            Err(e) => ToolOutcome::Failure(ToolFailure::Rejected {
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcbridge_core::{BackoffState, ConnectionState};
    use std::time::Duration;

    #[tokio::test]
    async fn reports_latest_snapshot() {
        let (tx, rx) = watch::channel(ConnectionSnapshot::default());
        let provider = SessionStatusProvider::new(rx);

        tx.send_replace(ConnectionSnapshot {
            state: ConnectionState::Reconnecting,
            backoff: BackoffState {
                attempt: 2,
                next_delay: Duration::from_millis(20_000),
            },
            terminal: false,
        });

        let inv = ToolInvocation::new(provider.id().clone(), CONNECTION_STATUS_OP, serde_json::json!({}));
        match provider.call(&inv).await {
            ToolOutcome::Success(value) => {
                assert_eq!(value["state"], "reconnecting");
                assert_eq!(value["backoff"]["attempt"], 2);
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }
}
