//! Event batcher — groups rapid-fire events into one batch after a quiet
//! period, and decides whether a batch deserves a reasoning turn.
//!
//! The batcher never sleeps. It owns a [`DebounceTimer`] that only records a
//! deadline; the orchestrator waits for that deadline and then calls
//! [`EventBatcher::on_timer_fire`]. Tests drive it with explicit instants.

use mcbridge_config::{RelevanceConfig, RelevanceMode};
use mcbridge_core::{DomainEvent, EventBatch};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A rearmable one-shot deadline.
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// (Re)start the quiet period at `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Decides whether a released batch warrants a turn.
pub trait RelevancePolicy: Send + Sync {
    fn name(&self) -> &str;

    fn is_relevant(&self, events: &[DomainEvent]) -> bool;
}

/// Every batch is relevant.
pub struct AlwaysRelevant;

impl RelevancePolicy for AlwaysRelevant {
    fn name(&self) -> &str {
        "always"
    }

    fn is_relevant(&self, _events: &[DomainEvent]) -> bool {
        true
    }
}

/// Relevant when any chat message mentions one of the agent's names.
pub struct MentionPolicy {
    names: Vec<String>,
    case_sensitive: bool,
    whole_word: bool,
}

impl MentionPolicy {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|n: &String| !n.trim().is_empty())
                .collect(),
            case_sensitive: false,
            whole_word: false,
        }
    }

    pub fn case_sensitive(mut self, on: bool) -> Self {
        self.case_sensitive = on;
        self
    }

    pub fn whole_word(mut self, on: bool) -> Self {
        self.whole_word = on;
        self
    }

    fn mentions(&self, text: &str) -> bool {
        let haystack = if self.case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        };
        self.names.iter().any(|name| {
            let needle = if self.case_sensitive {
                name.clone()
            } else {
                name.to_lowercase()
            };
            if self.whole_word {
                contains_word(&haystack, &needle)
            } else {
                haystack.contains(&needle)
            }
        })
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `needle` occurs in `haystack` with no word characters directly around it.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, m)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + m.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

impl RelevancePolicy for MentionPolicy {
    fn name(&self) -> &str {
        "mention"
    }

    fn is_relevant(&self, events: &[DomainEvent]) -> bool {
        events.iter().any(|event| match event {
            DomainEvent::ChatMessage { text, .. } => self.mentions(text),
            _ => false,
        })
    }
}

/// Build the configured policy for an agent answering to `names`.
pub fn policy_from_config(config: &RelevanceConfig, names: &[String]) -> Box<dyn RelevancePolicy> {
    match config.policy {
        RelevanceMode::Always => Box::new(AlwaysRelevant),
        RelevanceMode::Mention => Box::new(
            MentionPolicy::new(names.iter().cloned())
                .case_sensitive(config.case_sensitive)
                .whole_word(config.whole_word),
        ),
    }
}

pub struct EventBatcher {
    buffer: Vec<DomainEvent>,
    timer: DebounceTimer,
    policy: Box<dyn RelevancePolicy>,
}

impl EventBatcher {
    pub fn new(delay: Duration, policy: Box<dyn RelevancePolicy>) -> Self {
        Self {
            buffer: Vec::new(),
            timer: DebounceTimer::new(delay),
            policy,
        }
    }

    /// Buffer an event and restart the quiet period.
    pub fn submit(&mut self, event: DomainEvent, now: Instant) {
        self.buffer.push(event);
        self.timer.arm(now);
    }

    /// When the current quiet period ends, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Events waiting for the quiet period to end.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Release the buffer as one batch if the quiet period has ended.
    ///
    /// Early calls return `None` and leave everything untouched. With an
    /// empty buffer the timer is disarmed until the next `submit`.
    pub fn on_timer_fire(&mut self, now: Instant) -> Option<EventBatch> {
        if !self.timer.is_due(now) {
            return None;
        }
        self.timer.disarm();

        let events = std::mem::take(&mut self.buffer);
        let relevant = self.policy.is_relevant(&events);
        let batch = EventBatch::new(events, relevant)?;
        debug!(
            events = batch.len(),
            relevant,
            policy = self.policy.name(),
            "Batch released"
        );
        Some(batch)
    }
}
