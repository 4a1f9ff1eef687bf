//! The game-connection reconnect state machine.
//!
//! Pure bookkeeping: no I/O, no timers. Every method reports what the caller
//! must do next as a [`LinkAction`]; the game link task performs it.

use mcbridge_config::ReconnectConfig;
use mcbridge_core::error::SessionError;
use mcbridge_core::{BackoffState, ConnectionSnapshot, ConnectionState};
use std::time::Duration;

/// Delay schedule: `min(max, initial * multiplier^attempt)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub enabled: bool,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Limit on a single connect attempt.
    pub connect_timeout: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            enabled: config.enabled,
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// What the link must do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Nothing; the state did not change.
    None,
    /// Issue the provider's connect operation.
    Connect,
    /// Wait this long, then call [`ReconnectMachine::retry_elapsed`].
    ScheduleRetry(Duration),
    /// The link is lost for good (reconnect disabled).
    Fatal,
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: ConnectionState,
    backoff: BackoffState,
    policy: BackoffPolicy,
    terminal: bool,
}

impl ReconnectMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: BackoffState::default(),
            policy,
            terminal: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backoff(&self) -> BackoffState {
        self.backoff
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            backoff: self.backoff,
            terminal: self.terminal,
        }
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Start connecting. Anywhere but a non-terminal Disconnected this is a
    /// no-op: already connected, or an attempt or retry is already under way.
    pub fn connect(&mut self) -> Result<LinkAction, SessionError> {
        if self.state != ConnectionState::Disconnected || self.terminal {
            return Ok(LinkAction::None);
        }
        self.transition(ConnectionState::Connecting)?;
        Ok(LinkAction::Connect)
    }

    /// The connect operation succeeded.
    pub fn connect_succeeded(&mut self) -> Result<LinkAction, SessionError> {
        self.transition(ConnectionState::Connected)?;
        self.backoff = BackoffState::default();
        Ok(LinkAction::None)
    }

    /// The connect operation failed.
    pub fn connect_failed(&mut self) -> Result<LinkAction, SessionError> {
        if self.state != ConnectionState::Connecting {
            return Err(SessionError::IllegalTransition {
                from: self.state.to_string(),
                to: "connect failure".into(),
            });
        }
        self.back_off()
    }

    /// The provider reported that the game link dropped. Ignored unless
    /// Connected.
    pub fn disconnected(&mut self) -> Result<LinkAction, SessionError> {
        if self.state != ConnectionState::Connected {
            return Ok(LinkAction::None);
        }
        self.back_off()
    }

    /// The scheduled retry delay has passed.
    pub fn retry_elapsed(&mut self) -> Result<LinkAction, SessionError> {
        if self.state != ConnectionState::Reconnecting {
            return Ok(LinkAction::None);
        }
        self.transition(ConnectionState::Connecting)?;
        Ok(LinkAction::Connect)
    }

    fn back_off(&mut self) -> Result<LinkAction, SessionError> {
        if !self.policy.enabled {
            if self.state == ConnectionState::Connected {
                self.transition(ConnectionState::Reconnecting)?;
            }
            self.transition(ConnectionState::Disconnected)?;
            self.terminal = true;
            return Ok(LinkAction::Fatal);
        }

        let delay = self.policy.delay_for(self.backoff.attempt);
        self.backoff = BackoffState {
            attempt: self.backoff.attempt.saturating_add(1),
            next_delay: delay,
        };
        self.transition(ConnectionState::Reconnecting)?;
        Ok(LinkAction::ScheduleRetry(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn machine() -> ReconnectMachine {
        ReconnectMachine::new(BackoffPolicy::default())
    }

    #[test]
    fn backoff_doubles_up_to_ceiling_and_resets() {
        let mut m = machine();
        assert_eq!(m.connect().unwrap(), LinkAction::Connect);

        let mut delays = Vec::new();
        for _ in 0..10 {
            match m.connect_failed().unwrap() {
                LinkAction::ScheduleRetry(d) => delays.push(d.as_millis() as u64),
                other => panic!("Expected retry, got {other:?}"),
            }
            assert_eq!(m.retry_elapsed().unwrap(), LinkAction::Connect);
        }
        assert_eq!(
            delays,
            vec![5000, 10_000, 20_000, 40_000, 80_000, 160_000, 300_000, 300_000, 300_000, 300_000]
        );
        assert_eq!(m.backoff().attempt, 10);

        m.connect_succeeded().unwrap();
        assert_eq!(m.state(), Connected);
        assert_eq!(m.backoff(), BackoffState::default());
    }

    #[test]
    fn delays_never_decrease() {
        let policy = BackoffPolicy {
            enabled: true,
            initial: Duration::from_millis(750),
            max: Duration::from_millis(60_000),
            multiplier: 1.7,
            ..BackoffPolicy::default()
        };
        let delays: Vec<Duration> = (0..40).map(|a| policy.delay_for(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(60_000));
    }

    #[test]
    fn connect_while_connected_is_noop() {
        let mut m = machine();
        m.connect().unwrap();
        m.connect_succeeded().unwrap();
        let before = m.snapshot();
        assert_eq!(m.connect().unwrap(), LinkAction::None);
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn connect_while_connecting_or_reconnecting_is_noop() {
        let mut m = machine();
        m.connect().unwrap();
        assert_eq!(m.connect().unwrap(), LinkAction::None);
        m.connect_failed().unwrap();
        assert_eq!(m.state(), Reconnecting);
        assert_eq!(m.connect().unwrap(), LinkAction::None);
        assert_eq!(m.state(), Reconnecting);
    }

    #[test]
    fn drop_while_connected_follows_backoff() {
        let mut m = machine();
        m.connect().unwrap();
        m.connect_succeeded().unwrap();

        let mut states = vec![m.state()];
        assert_eq!(
            m.disconnected().unwrap(),
            LinkAction::ScheduleRetry(Duration::from_millis(5000))
        );
        states.push(m.state());
        m.retry_elapsed().unwrap();
        states.push(m.state());
        m.connect_succeeded().unwrap();
        states.push(m.state());

        assert_eq!(states, vec![Connected, Reconnecting, Connecting, Connected]);
        assert_eq!(m.backoff().attempt, 0);
    }

    #[test]
    fn disconnect_when_not_connected_is_ignored() {
        let mut m = machine();
        assert_eq!(m.disconnected().unwrap(), LinkAction::None);
        m.connect().unwrap();
        assert_eq!(m.disconnected().unwrap(), LinkAction::None);
        assert_eq!(m.state(), Connecting);
    }

    #[test]
    fn disabled_reconnect_is_terminal() {
        let mut m = ReconnectMachine::new(BackoffPolicy {
            enabled: false,
            ..BackoffPolicy::default()
        });
        m.connect().unwrap();
        m.connect_succeeded().unwrap();
        assert_eq!(m.disconnected().unwrap(), LinkAction::Fatal);
        assert_eq!(m.state(), Disconnected);
        assert!(m.snapshot().terminal);
        // Terminal: connect does not start another attempt.
        assert_eq!(m.connect().unwrap(), LinkAction::None);
    }

    #[test]
    fn disabled_reconnect_failed_first_attempt() {
        let mut m = ReconnectMachine::new(BackoffPolicy {
            enabled: false,
            ..BackoffPolicy::default()
        });
        m.connect().unwrap();
        assert_eq!(m.connect_failed().unwrap(), LinkAction::Fatal);
        assert_eq!(m.state(), Disconnected);
    }

    #[test]
    fn success_outside_connecting_is_illegal() {
        let mut m = machine();
        assert!(matches!(
            m.connect_succeeded(),
            Err(SessionError::IllegalTransition { .. })
        ));
        assert!(m.connect_failed().is_err());
    }
}
