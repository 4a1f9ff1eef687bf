//! Bridge event bus — lifecycle notifications for logging and observers.
//!
//! Components publish what they did; anything interested (the CLI's status
//! log, tests asserting on turn boundaries) subscribes without the publishers
//! knowing about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::connection::ConnectionState;

/// Everything the orchestrator reports about its own progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeEvent {
    /// The batcher released a batch after its quiet period.
    BatchReleased {
        events: usize,
        relevant: bool,
        timestamp: DateTime<Utc>,
    },

    /// A turn was opened.
    TurnStarted {
        turn_id: u64,
        idle: bool,
        events: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn was closed: normally, by timeout, or cancelled on shutdown.
    TurnClosed {
        turn_id: u64,
        invocations: usize,
        timed_out: bool,
        cancelled: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation produced its result.
    ToolInvoked {
        turn_id: u64,
        provider: String,
        operation: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The game link moved to a new state.
    ConnectionChanged {
        state: ConnectionState,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lose the oldest events rather than blocking publishers. Clones share the
/// same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<BridgeEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: BridgeEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BridgeEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(BridgeEvent::ToolInvoked {
            turn_id: 3,
            provider: "minecraft".into(),
            operation: "chat".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            BridgeEvent::ToolInvoked {
                operation, success, ..
            } => {
                assert_eq!(operation, "chat");
                assert!(success);
            }
            _ => panic!("Expected ToolInvoked event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(BridgeEvent::ConnectionChanged {
            state: ConnectionState::Connecting,
            attempt: 0,
            timestamp: Utc::now(),
        });
    }
}
