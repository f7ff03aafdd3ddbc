//! WebSocket error types and close codes.

use thiserror::Error;

use super::state::ConnectionState;

/// Close codes used by the gateway (RFC 6455 section 7.4.1)
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    /// Reported when the peer's close frame carried no status
    pub const NO_STATUS: u16 = 1005;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Failures reported by a transport half.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Errors returned by [`Connection`](super::Connection) operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection is not in a state that permits the operation
    #[error("cannot {operation} while connection is {state}")]
    InvalidOperation {
        operation: &'static str,
        state: ConnectionState,
    },

    /// The connection is gone; `code` is the close code when one is known
    #[error("connection closed: {reason}")]
    ConnectionClosed { code: Option<u16>, reason: String },

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A text receive produced bytes that are not UTF-8
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
}

impl ConnectionError {
    pub(crate) fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        ConnectionError::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Whether the connection can no longer be used after this error
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConnectionClosed { .. } | ConnectionError::MessageTooLarge { .. }
        )
    }
}
