//! Connection state machine for the bus connector.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! connection lifecycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (opening the socket, arming timers) is performed by
//! bus-client, not by this module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reconnection backoff parameters.
///
/// The delay after `n` consecutive failures is `min(base * 2^n, max_delay)`.
/// Once `n` exceeds `max_attempts` the connector gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Default base delay (2 seconds).
    pub const DEFAULT_BASE: Duration = Duration::from_secs(2);
    /// Default delay cap (30 seconds).
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
    /// Default attempt limit.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        // 2^31 already saturates any sane cap; avoid shift overflow
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `failures` failures.
    pub fn allows(&self, failures: u32) -> bool {
        failures <= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            max_delay: Self::DEFAULT_MAX_DELAY,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Coarse status signal exposed to host applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Identified with the broker; sends go out immediately.
    Connected,
    /// Opening the transport.
    Connecting,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Idle. Only an explicit connect leaves this state.
    Disconnected,
    /// Gave up after exhausting reconnect attempts.
    Error,
}

impl ConnectionStatus {
    /// Wire/display name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected,
    /// Transport open in progress.
    Connecting {
        /// Consecutive failures before this attempt.
        attempt: u32,
    },
    /// Open and identified.
    Connected,
    /// Waiting for the backoff timer.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (bus-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: Event, backoff: &BackoffPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, Event::ConnectRequested) => (
                Self::Connecting { attempt: 0 },
                vec![Action::SetStatus(ConnectionStatus::Connecting), Action::Connect],
            ),

            // From Connecting
            (Self::Connecting { .. }, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    Action::SetStatus(ConnectionStatus::Connected),
                    Action::StartHeartbeat,
                    Action::DrainQueue,
                ],
            ),
            (Self::Connecting { attempt }, Event::ConnectFailed { error }) => {
                fail(attempt.saturating_add(1), error, vec![], backoff)
            }
            (Self::Connecting { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Disconnect,
                    Action::SetStatus(ConnectionStatus::Disconnected),
                ],
            ),

            // From Connected
            (Self::Connected, Event::ConnectionLost { reason }) => {
                fail(1, reason, vec![Action::StopHeartbeat], backoff)
            }
            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::StopHeartbeat,
                    Action::Disconnect,
                    Action::SetStatus(ConnectionStatus::Disconnected),
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { attempt }, Event::ReconnectTimer) => (
                Self::Connecting { attempt },
                vec![Action::SetStatus(ConnectionStatus::Connecting), Action::Connect],
            ),
            (Self::Reconnecting { attempt }, Event::ConnectRequested) => (
                Self::Connecting { attempt },
                vec![
                    Action::CancelReconnect,
                    Action::SetStatus(ConnectionStatus::Connecting),
                    Action::Connect,
                ],
            ),
            (Self::Reconnecting { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelReconnect,
                    Action::SetStatus(ConnectionStatus::Disconnected),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Reconnecting { .. })
    }

    /// Consecutive failures recorded by this state.
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Connecting { attempt } | Self::Reconnecting { attempt } => *attempt,
            Self::Connected | Self::Disconnected => 0,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn fail(
    failures: u32,
    error: String,
    mut actions: Vec<Action>,
    backoff: &BackoffPolicy,
) -> (ConnectionState, Vec<Action>) {
    if !backoff.allows(failures) {
        actions.push(Action::GiveUp {
            attempts: failures,
            error,
        });
        actions.push(Action::SetStatus(ConnectionStatus::Error));
        return (ConnectionState::Disconnected, actions);
    }
    let delay = backoff.delay(failures);
    actions.push(Action::SetStatus(ConnectionStatus::Reconnecting));
    actions.push(Action::StartReconnectTimer {
        attempt: failures,
        delay,
        error,
    });
    (ConnectionState::Reconnecting { attempt: failures }, actions)
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Host requested connection.
    ConnectRequested,
    /// Transport opened and identification sent.
    ConnectSucceeded,
    /// Transport open failed or timed out.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An established connection dropped (close, error, missed pong).
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// Host requested disconnect.
    DisconnectRequested,
    /// Backoff timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the connector.
///
/// These are instructions, not side effects. The connector interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport and identify.
    Connect,
    /// Close the transport.
    Disconnect,
    /// Arm the ping interval.
    StartHeartbeat,
    /// Disarm the ping interval and any pong deadline.
    StopHeartbeat,
    /// Flush the outbound queue in FIFO order.
    DrainQueue,
    /// Arm the backoff timer.
    StartReconnectTimer {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
        /// The failure that caused this.
        error: String,
    },
    /// Disarm the backoff timer.
    CancelReconnect,
    /// Retry budget exhausted.
    GiveUp {
        /// Failures counted.
        attempts: u32,
        /// The last failure.
        error: String,
    },
    /// Publish a new coarse status.
    SetStatus(ConnectionStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
    }

    fn step(state: ConnectionState, event: Event) -> (ConnectionState, Vec<Action>) {
        state.on_event(event, &policy())
    }

    fn reconnect_delay(actions: &[Action]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::StartReconnectTimer { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    #[test]
    fn starts_disconnected() {
        let state = ConnectionState::new();
        assert!(matches!(state, ConnectionState::Disconnected));
    }

    #[test]
    fn connect_request_transitions_to_connecting() {
        let (new_state, actions) = step(ConnectionState::Disconnected, Event::ConnectRequested);

        assert_eq!(new_state, ConnectionState::Connecting { attempt: 0 });
        assert!(actions.contains(&Action::Connect));
        assert!(actions.contains(&Action::SetStatus(ConnectionStatus::Connecting)));
    }

    #[test]
    fn connect_success_drains_queue_and_starts_heartbeat() {
        let (new_state, actions) = step(
            ConnectionState::Connecting { attempt: 3 },
            Event::ConnectSucceeded,
        );

        assert!(new_state.is_connected());
        assert_eq!(new_state.attempt(), 0);
        assert!(actions.contains(&Action::StartHeartbeat));
        assert!(actions.contains(&Action::DrainQueue));
        assert!(actions.contains(&Action::SetStatus(ConnectionStatus::Connected)));
    }

    #[test]
    fn connect_failure_triggers_reconnect() {
        let (new_state, actions) = step(
            ConnectionState::Connecting { attempt: 0 },
            Event::ConnectFailed {
                error: "refused".into(),
            },
        );

        assert_eq!(new_state, ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(reconnect_delay(&actions), Some(Duration::from_secs(4)));
        assert!(actions.contains(&Action::SetStatus(ConnectionStatus::Reconnecting)));
    }

    #[test]
    fn reconnect_timer_transitions_to_connecting() {
        let (new_state, actions) = step(
            ConnectionState::Reconnecting { attempt: 2 },
            Event::ReconnectTimer,
        );

        assert_eq!(new_state, ConnectionState::Connecting { attempt: 2 });
        assert!(actions.contains(&Action::Connect));
    }

    #[test]
    fn reconnect_failure_increments_attempt() {
        let (new_state, actions) = step(
            ConnectionState::Connecting { attempt: 2 },
            Event::ConnectFailed {
                error: "timeout".into(),
            },
        );

        assert_eq!(new_state, ConnectionState::Reconnecting { attempt: 3 });
        assert_eq!(reconnect_delay(&actions), Some(Duration::from_secs(16)));
    }

    #[test]
    fn backoff_follows_formula_and_caps() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_secs(2));
        assert_eq!(p.delay(1), Duration::from_secs(4));
        assert_eq!(p.delay(2), Duration::from_secs(8));
        assert_eq!(p.delay(3), Duration::from_secs(16));
        assert_eq!(p.delay(4), Duration::from_secs(30));
        assert_eq!(p.delay(10), Duration::from_secs(30));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn backoff_with_custom_base() {
        let p = BackoffPolicy {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
        };
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(800));
        assert_eq!(p.delay(4), Duration::from_secs(1));
    }

    #[test]
    fn n_consecutive_failures_give_expected_delays() {
        let p = policy();
        let mut state = ConnectionState::Disconnected;
        state = state.on_event(Event::ConnectRequested, &p).0;

        for n in 1..=p.max_attempts {
            let (next, actions) = state.on_event(
                Event::ConnectFailed {
                    error: "refused".into(),
                },
                &p,
            );
            assert_eq!(next, ConnectionState::Reconnecting { attempt: n });
            assert_eq!(reconnect_delay(&actions), Some(p.delay(n)));
            state = next.on_event(Event::ReconnectTimer, &p).0;
        }
    }

    #[test]
    fn exhausting_attempts_gives_up() {
        let p = policy();
        let (new_state, actions) = ConnectionState::Connecting {
            attempt: p.max_attempts,
        }
        .on_event(
            Event::ConnectFailed {
                error: "refused".into(),
            },
            &p,
        );

        assert_eq!(new_state, ConnectionState::Disconnected);
        assert!(actions.contains(&Action::SetStatus(ConnectionStatus::Error)));
        let gave_up_after = actions.iter().find_map(|a| match a {
            Action::GiveUp { attempts, .. } => Some(*attempts),
            _ => None,
        });
        assert_eq!(gave_up_after, Some(p.max_attempts + 1));
        assert!(reconnect_delay(&actions).is_none());
    }

    #[test]
    fn manual_connect_after_giving_up_starts_fresh() {
        let (state, _) = step(ConnectionState::Disconnected, Event::ConnectRequested);
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn connection_lost_counts_as_first_failure() {
        let (new_state, actions) = step(
            ConnectionState::Connected,
            Event::ConnectionLost {
                reason: "pong timeout".into(),
            },
        );

        assert_eq!(new_state, ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(actions.first(), Some(&Action::StopHeartbeat));
        assert_eq!(reconnect_delay(&actions), Some(Duration::from_secs(4)));
    }

    #[test]
    fn counter_resets_on_connected() {
        let (state, _) = step(
            ConnectionState::Connecting { attempt: 5 },
            Event::ConnectSucceeded,
        );
        let (state, actions) = step(
            state,
            Event::ConnectionLost {
                reason: "closed".into(),
            },
        );

        assert_eq!(state, ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(reconnect_delay(&actions), Some(Duration::from_secs(4)));
    }

    #[test]
    fn disconnect_request_from_connected() {
        let (new_state, actions) = step(ConnectionState::Connected, Event::DisconnectRequested);

        assert_eq!(new_state, ConnectionState::Disconnected);
        assert!(actions.contains(&Action::StopHeartbeat));
        assert!(actions.contains(&Action::Disconnect));
        assert!(actions.contains(&Action::SetStatus(ConnectionStatus::Disconnected)));
    }

    #[test]
    fn disconnect_request_from_reconnecting_cancels() {
        let (new_state, actions) = step(
            ConnectionState::Reconnecting { attempt: 2 },
            Event::DisconnectRequested,
        );

        assert_eq!(new_state, ConnectionState::Disconnected);
        assert!(actions.contains(&Action::CancelReconnect));
    }

    #[test]
    fn manual_connect_while_reconnecting_skips_timer() {
        let (new_state, actions) = step(
            ConnectionState::Reconnecting { attempt: 4 },
            Event::ConnectRequested,
        );

        assert_eq!(new_state, ConnectionState::Connecting { attempt: 4 });
        assert_eq!(actions.first(), Some(&Action::CancelReconnect));
        assert!(actions.contains(&Action::Connect));
    }

    #[test]
    fn stray_events_are_ignored() {
        let (state, actions) = step(ConnectionState::Disconnected, Event::ReconnectTimer);
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(actions.is_empty());

        let (state, actions) = step(ConnectionState::Connected, Event::ConnectRequested);
        assert_eq!(state, ConnectionState::Connected);
        assert!(actions.is_empty());
    }

    #[test]
    fn is_connecting_helper() {
        assert!(!ConnectionState::Disconnected.is_connecting());
        assert!(ConnectionState::Connecting { attempt: 0 }.is_connecting());
        assert!(!ConnectionState::Connected.is_connecting());
        assert!(ConnectionState::Reconnecting { attempt: 1 }.is_connecting());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
