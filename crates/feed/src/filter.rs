//! Self-authored message filter.
//!
//! The agent's own chat shows up in the server log like anyone else's. Feeding
//! it back would make the agent answer itself forever, so chat whose speaker is
//! one of the agent's names is dropped here, before batching. Joins and leaves
//! of the agent are kept: reconnects are worth knowing about.

use mcbridge_core::DomainEvent;

#[derive(Debug, Clone, Default)]
pub struct SelfFilter {
    /// Lowercased names the agent goes by
    names: Vec<String>,
}

impl SelfFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lowered: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim().to_lowercase();
            if !name.is_empty() && !lowered.contains(&name) {
                lowered.push(name);
            }
        }
        Self { names: lowered }
    }

    pub fn is_self_authored(&self, event: &DomainEvent) -> bool {
        match event {
            DomainEvent::ChatMessage { speaker, .. } => {
                let speaker = speaker.to_lowercase();
                self.names.iter().any(|n| *n == speaker)
            }
            _ => false,
        }
    }

    /// Pass the event through unless the agent wrote it.
    pub fn admit(&self, event: DomainEvent) -> Option<DomainEvent> {
        if self.is_self_authored(&event) {
            None
        } else {
            Some(event)
        }
    }
}
