//! Session Error Types

use ble_transport::TransportError;
use obd_protocol::ObdError;
use thiserror::Error;

/// Errors raised by the session controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ObdError),

    /// An init command failed or was rejected; the link has been closed
    #[error("Initialization failed at {command}: {reason}")]
    InitFailed { command: String, reason: String },
}
