use std::fmt;

use serde::Serialize;

/// Lifecycle of a [`Connection`](super::Connection).
///
/// ```text
/// Connecting -> Connected -> Communicating <-> Idle
///                    \             |            /
///                     +--> Closing -> Closed <-+
///                                  Error (transport failure)
/// ```
///
/// `Closed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// A send or receive is in flight
    Communicating,
    Idle,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }

    /// Connected, communicating or idle
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Communicating | ConnectionState::Idle
        )
    }

    /// Whether a new send or receive may start
    pub fn accepts_operations(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Idle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Communicating => "communicating",
            ConnectionState::Idle => "idle",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
