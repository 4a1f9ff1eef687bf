//! Line grammar for the server log feed.
//!
//! Classification is best-effort pattern matching. A line first loses its
//! server log prefix (`[12:34:56] [Server thread/INFO]: `), then:
//!
//! - `<speaker> text` and `[speaker]: text` are chat, including unsigned
//!   chat tagged `[Not Secure] <speaker> text`
//! - `speaker joined the game` / `speaker left the game` are joins and leaves
//! - anything else non-empty is a system notice (deaths, advancements,
//!   relays, plugin output)
//!
//! Blank lines and bare prefixes produce nothing.

use mcbridge_core::DomainEvent;
use mcbridge_core::error::FeedError;
use regex_lite::Regex;

pub struct LineGrammar {
    prefix: Regex,
    angle_chat: Regex,
    bracket_chat: Regex,
    join: Regex,
    leave: Regex,
}

impl LineGrammar {
    pub fn new() -> Result<Self, FeedError> {
        let compile = |p: &str| Regex::new(p).map_err(|e| FeedError::Grammar(e.to_string()));
        Ok(Self {
            prefix: compile(r"^\[\d{1,2}:\d{2}:\d{2}(?:\.\d+)?\] \[[^\]]+\]: ?")?,
            angle_chat: compile(r"^(?:\[Not Secure\] )?<([^<>]+)> (.*)$")?,
            bracket_chat: compile(r"^\[([^\[\]]+)\]: (.*)$")?,
            join: compile(r"^(\S+)(?: \(formerly known as \S+\))? joined the game$")?,
            leave: compile(r"^(\S+) left the game$")?,
        })
    }

    /// Strip the server log prefix, if present.
    pub fn content<'a>(&self, line: &'a str) -> &'a str {
        let line = line.trim_end_matches(['\r', '\n']);
        match self.prefix.find(line) {
            Some(m) => &line[m.end()..],
            None => line,
        }
    }

    /// Classify one raw feed line.
    pub fn classify(&self, line: &str) -> Option<DomainEvent> {
        let content = self.content(line).trim();
        if content.is_empty() {
            return None;
        }

        if let Some(c) = self
            .angle_chat
            .captures(content)
            .or_else(|| self.bracket_chat.captures(content))
        {
            return Some(DomainEvent::chat(c[1].trim(), c[2].trim()));
        }
        if let Some(c) = self.join.captures(content) {
            return Some(DomainEvent::join(&c[1]));
        }
        if let Some(c) = self.leave.captures(content) {
            return Some(DomainEvent::leave(&c[1]));
        }
        Some(DomainEvent::notice(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(event: &DomainEvent) -> &'static str {
        match event {
            DomainEvent::ChatMessage { .. } => "chat",
            DomainEvent::PlayerJoin { .. } => "join",
            DomainEvent::PlayerLeave { .. } => "leave",
            DomainEvent::SystemNotice { .. } => "notice",
        }
    }

    #[test]
    fn bracket_chat() {
        let g = LineGrammar::new().unwrap();
        let event = g.classify("[Alice]: HaksBot can you help me?").unwrap();
        match event {
            DomainEvent::ChatMessage { speaker, text, .. } => {
                assert_eq!(speaker, "Alice");
                assert_eq!(text, "HaksBot can you help me?");
            }
            other => panic!("Expected chat, got {other:?}"),
        }
    }

    #[test]
    fn server_log_chat_with_prefix() {
        let g = LineGrammar::new().unwrap();
        let event = g
            .classify("[14:02:11] [Server thread/INFO]: <Steve> anyone got iron?")
            .unwrap();
        assert_eq!(event.speaker(), Some("Steve"));
        assert_eq!(event.render(), "<Steve> anyone got iron?");
    }

    #[test]
    fn unsigned_chat_is_still_chat() {
        let g = LineGrammar::new().unwrap();
        let event = g
            .classify("[14:02:11] [Server thread/INFO]: [Not Secure] <Alice> HaksBot can you help me?")
            .unwrap();
        match event {
            DomainEvent::ChatMessage { speaker, text, .. } => {
                assert_eq!(speaker, "Alice");
                assert_eq!(text, "HaksBot can you help me?");
            }
            other => panic!("Expected chat, got {other:?}"),
        }
    }

    #[test]
    fn joins_and_leaves() {
        let g = LineGrammar::new().unwrap();
        let join = g
            .classify("[09:00:00] [Server thread/INFO]: Alice joined the game")
            .unwrap();
        assert_eq!(kind(&join), "join");
        assert_eq!(join.speaker(), Some("Alice"));

        let renamed = g.classify("Bob (formerly known as Rob) joined the game").unwrap();
        assert_eq!(renamed.speaker(), Some("Bob"));

        let leave = g.classify("Alice left the game").unwrap();
        assert_eq!(kind(&leave), "leave");
    }

    #[test]
    fn other_server_output_is_a_notice() {
        let g = LineGrammar::new().unwrap();
        let death = g
            .classify("[10:10:10] [Server thread/INFO]: Steve was slain by Zombie")
            .unwrap();
        assert_eq!(kind(&death), "notice");
        assert_eq!(death.render(), "Steve was slain by Zombie");

        let relay = g.classify("[Discord] <carol> hello from discord").unwrap();
        assert_eq!(kind(&relay), "notice");
    }

    #[test]
    fn blank_and_bare_prefix_lines_are_dropped() {
        let g = LineGrammar::new().unwrap();
        assert!(g.classify("").is_none());
        assert!(g.classify("   \r\n").is_none());
        assert!(g.classify("[10:10:10] [Server thread/INFO]: ").is_none());
    }

    #[test]
    fn millisecond_timestamps_are_stripped() {
        let g = LineGrammar::new().unwrap();
        assert_eq!(
            g.content("[10:10:10.123] [Worker-Main-1/WARN]: Can't keep up!"),
            "Can't keep up!"
        );
    }
}
