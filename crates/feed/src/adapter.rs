//! The event source adapter: raw lines in, domain events out.

use mcbridge_core::DomainEvent;
use mcbridge_core::error::FeedError;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::filter::SelfFilter;
use crate::grammar::LineGrammar;
use crate::source::FeedSource;

/// Grammar plus the self-authored filter.
pub struct EventAdapter {
    grammar: LineGrammar,
    filter: SelfFilter,
}

impl EventAdapter {
    pub fn new(filter: SelfFilter) -> Result<Self, FeedError> {
        Ok(Self {
            grammar: LineGrammar::new()?,
            filter,
        })
    }

    /// Turn one raw line into an event, or nothing if the line is not an
    /// event or the agent wrote it.
    pub fn parse(&self, line: &str) -> Option<DomainEvent> {
        let event = self.grammar.classify(line)?;
        let admitted = self.filter.admit(event);
        if admitted.is_none() {
            debug!(line = %line, "Dropped self-authored chat");
        }
        admitted
    }

    /// Start `source` and parse its lines on a separate task. The returned
    /// receiver yields events in feed order and closes when the source stops.
    pub async fn spawn(
        self,
        source: Box<dyn FeedSource>,
        capacity: usize,
    ) -> Result<mpsc::Receiver<DomainEvent>, FeedError> {
        let mut lines = source.start().await?;
        let (tx, rx) = mpsc::channel(capacity);
        let name = source.name().to_string();
        info!(feed = %name, "Feed started");

        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                if let Some(event) = self.parse(&line)
                    && tx.send(event).await.is_err()
                {
                    break;
                }
            }
            debug!(feed = %name, "Feed adapter stopped");
        });

        Ok(rx)
    }
}
