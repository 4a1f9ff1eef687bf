//! Game-session events and the batches they are released in.
//!
//! A [`DomainEvent`] is produced by the feed adapter from one raw log line and
//! is immutable afterwards. The batcher groups consecutive events into an
//! [`EventBatch`], which is what the orchestrator hands to a reasoning turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something that happened in the game session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A player said something in chat.
    ChatMessage {
        speaker: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A player joined the server.
    PlayerJoin {
        speaker: String,
        timestamp: DateTime<Utc>,
    },

    /// A player left the server.
    PlayerLeave {
        speaker: String,
        timestamp: DateTime<Utc>,
    },

    /// Free-form server output: deaths, advancements, relays, plugin output.
    SystemNotice {
        text: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn chat(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self::ChatMessage {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn join(speaker: impl Into<String>) -> Self {
        Self::PlayerJoin {
            speaker: speaker.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn leave(speaker: impl Into<String>) -> Self {
        Self::PlayerLeave {
            speaker: speaker.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::SystemNotice {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ChatMessage { timestamp, .. }
            | Self::PlayerJoin { timestamp, .. }
            | Self::PlayerLeave { timestamp, .. }
            | Self::SystemNotice { timestamp, .. } => *timestamp,
        }
    }

    /// The speaker, for events that have one.
    pub fn speaker(&self) -> Option<&str> {
        match self {
            Self::ChatMessage { speaker, .. }
            | Self::PlayerJoin { speaker, .. }
            | Self::PlayerLeave { speaker, .. } => Some(speaker),
            Self::SystemNotice { .. } => None,
        }
    }

    /// One-line rendering as it would appear in the server console.
    pub fn render(&self) -> String {
        match self {
            Self::ChatMessage { speaker, text, .. } => format!("<{speaker}> {text}"),
            Self::PlayerJoin { speaker, .. } => format!("{speaker} joined the game"),
            Self::PlayerLeave { speaker, .. } => format!("{speaker} left the game"),
            Self::SystemNotice { text, .. } => text.clone(),
        }
    }
}

/// An ordered, non-empty run of events released after a quiet period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    events: Vec<DomainEvent>,

    /// Whether this batch warrants a reasoning turn.
    pub relevant: bool,
}

impl EventBatch {
    /// Build a batch. Returns `None` for an empty event list.
    pub fn new(events: Vec<DomainEvent>, relevant: bool) -> Option<Self> {
        if events.is_empty() {
            return None;
        }
        Some(Self { events, relevant })
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<DomainEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append a later batch, keeping release order. The result is relevant if
    /// either side was.
    pub fn absorb(&mut self, later: EventBatch) {
        self.relevant |= later.relevant;
        self.events.extend(later.events);
    }

    /// The console rendering handed to the engine as the turn prompt.
    pub fn render(&self) -> String {
        let lines: Vec<String> = self.events.iter().map(DomainEvent::render).collect();
        format!("Server log:\n{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_rejected() {
        assert!(EventBatch::new(vec![], true).is_none());
    }

    #[test]
    fn absorb_preserves_order_and_relevance() {
        let mut first = EventBatch::new(vec![DomainEvent::chat("Alice", "one")], false).unwrap();
        let second = EventBatch::new(
            vec![DomainEvent::chat("Bob", "two"), DomainEvent::join("Carol")],
            true,
        )
        .unwrap();

        first.absorb(second);

        assert!(first.relevant);
        let speakers: Vec<_> = first.events().iter().filter_map(|e| e.speaker()).collect();
        assert_eq!(speakers, vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn render_uses_console_forms() {
        let batch = EventBatch::new(
            vec![
                DomainEvent::chat("Alice", "hi"),
                DomainEvent::leave("Bob"),
                DomainEvent::notice("Steve was slain by Zombie"),
            ],
            true,
        )
        .unwrap();
        assert_eq!(
            batch.render(),
            "Server log:\n<Alice> hi\nBob left the game\nSteve was slain by Zombie"
        );
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_string(&DomainEvent::join("Alice")).unwrap();
        assert!(json.contains(r#""kind":"player_join""#));
    }
}
