//! Connection State

use serde::{Deserialize, Serialize};

/// Lifecycle of one adapter connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No link and no scan running
    #[default]
    Disconnected,
    /// Looking for advertising adapters
    Scanning,
    /// Link establishment and characteristic discovery in progress
    Connecting,
    /// Physical link up, adapter not yet initialized
    Connected,
    /// ELM327 init sequence running
    Initializing,
    /// Init sequence finished, ready for commands
    Ready,
    /// Poll loop active
    Streaming,
    /// Attempting to restore a dropped link
    Reconnecting,
    /// Last connect or init attempt failed
    Error,
}

impl ConnectionState {
    /// Check whether the poll loop may run another sweep
    pub fn can_poll(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Ready | ConnectionState::Streaming
        )
    }

    /// States set by the session layer rather than by the link itself
    pub fn is_session_driven(&self) -> bool {
        matches!(
            self,
            ConnectionState::Initializing
                | ConnectionState::Ready
                | ConnectionState::Streaming
                | ConnectionState::Error
        )
    }

    /// Upper-case name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Scanning => "SCANNING",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Initializing => "INITIALIZING",
            ConnectionState::Ready => "READY",
            ConnectionState::Streaming => "STREAMING",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
