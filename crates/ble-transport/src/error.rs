//! Transport Error Types

use obd_protocol::ConnectionState;
use thiserror::Error;

/// Errors raised by the radio stack or the command queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Radio unavailable or scan could not start
    #[error("Bluetooth scan failed: {0}")]
    Scan(String),

    /// Link rejected or required characteristics missing
    #[error("Connection failed: {0}")]
    Connect(String),

    /// No complete frame arrived before the deadline
    #[error("Command {command} timed out after {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    /// Physical link went away or was closed while the command was pending
    #[error("Link to adapter lost")]
    LinkLost,

    /// Command issued with no link up
    #[error("Adapter not connected")]
    NotConnected,

    /// Radio stack refused a characteristic write
    #[error("Write failed: {0}")]
    Write(String),

    /// Session layer asked for a state the link cannot move to
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl TransportError {
    /// Check whether the error means the link is gone
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            TransportError::LinkLost | TransportError::NotConnected | TransportError::Write(_)
        )
    }
}
