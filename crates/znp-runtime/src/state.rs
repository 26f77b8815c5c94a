//! Connection State Machine
//!
//! Guarded lifecycle of the dispatcher's link to the coprocessor. Only one
//! path leads into `Reconnecting`, so at most one reconnect loop can ever be
//! started per connection loss.

use core::fmt;
use serde::{Deserialize, Serialize};
use znp_core::StateTransitionError;

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Lifecycle of the link to the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link; the initial and closed state
    #[default]
    Disconnected,
    /// Opening the transport and pinging the device
    Connecting,
    /// Operational
    Connected,
    /// Link lost; a background loop is reopening it
    Reconnecting,
}

/// Events that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Caller asked to connect
    Connect,
    /// Transport opened and the device answered
    Established,
    /// Opening or pinging failed
    ConnectFailed,
    /// Transport reported loss of an operational link
    ConnectionLost { reconnect: bool },
    /// Caller asked to close
    Close,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl ConnectionState {
    /// State name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        }
    }

    /// Apply `event`, rejecting transitions the lifecycle does not allow
    pub fn transition(self, event: ConnectionEvent) -> Result<Self, StateTransitionError> {
        let next = match (self, event) {
            (ConnectionState::Disconnected, ConnectionEvent::Connect) => ConnectionState::Connecting,

            (ConnectionState::Connecting, ConnectionEvent::Established) => ConnectionState::Connected,
            (ConnectionState::Connecting, ConnectionEvent::ConnectFailed) => {
                ConnectionState::Disconnected
            }

            (ConnectionState::Connected, ConnectionEvent::ConnectionLost { reconnect: true }) => {
                ConnectionState::Reconnecting
            }
            (ConnectionState::Connected, ConnectionEvent::ConnectionLost { reconnect: false }) => {
                ConnectionState::Disconnected
            }

            // The reconnect loop keeps retrying until it succeeds or is closed
            (ConnectionState::Reconnecting, ConnectionEvent::Established) => {
                ConnectionState::Connected
            }
            (ConnectionState::Reconnecting, ConnectionEvent::ConnectFailed) => {
                ConnectionState::Reconnecting
            }

            (_, ConnectionEvent::Close) => ConnectionState::Disconnected,

            (state, event) => {
                return Err(StateTransitionError {
                    from: state.state_name().to_string(),
                    event: format!("{:?}", event),
                })
            }
        };

        Ok(next)
    }

    /// Whether requests may be written
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ConnectionState::default();
        assert_eq!(state.state_name(), "Disconnected");
        assert!(!state.can_send());
    }

    #[test]
    fn test_connection_flow() {
        let state = ConnectionState::Disconnected
            .transition(ConnectionEvent::Connect)
            .unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        let state = state.transition(ConnectionEvent::Established).unwrap();
        assert!(state.can_send());

        let state = state
            .transition(ConnectionEvent::ConnectionLost { reconnect: true })
            .unwrap();
        assert_eq!(state, ConnectionState::Reconnecting);

        let state = state.transition(ConnectionEvent::ConnectFailed).unwrap();
        assert_eq!(state, ConnectionState::Reconnecting);

        let state = state.transition(ConnectionEvent::Established).unwrap();
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn test_loss_without_reconnect_disconnects() {
        let state = ConnectionState::Connected
            .transition(ConnectionEvent::ConnectionLost { reconnect: false })
            .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let state = ConnectionState::Connecting
            .transition(ConnectionEvent::ConnectFailed)
            .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_second_loss_while_reconnecting_is_rejected() {
        let error = ConnectionState::Reconnecting
            .transition(ConnectionEvent::ConnectionLost { reconnect: true })
            .unwrap_err();
        assert_eq!(error.from, "Reconnecting");
    }

    #[test]
    fn test_invalid_transition() {
        assert!(ConnectionState::Connected
            .transition(ConnectionEvent::Connect)
            .is_err());
        assert!(ConnectionState::Disconnected
            .transition(ConnectionEvent::Established)
            .is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
        ] {
            assert_eq!(
                state.transition(ConnectionEvent::Close).unwrap(),
                ConnectionState::Disconnected
            );
        }
    }
}
