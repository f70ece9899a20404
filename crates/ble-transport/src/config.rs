//! Transport configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a scan listens for advertisements (milliseconds)
    pub scan_window_ms: u64,

    /// Default per-command deadline (milliseconds)
    pub command_timeout_ms: u64,

    /// Pause between two commands so slow firmware can drain its buffer
    pub inter_command_delay_ms: u64,

    /// Case-insensitive name fragments that mark an advertiser as an OBD adapter
    pub adapter_name_tokens: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            scan_window_ms: 8000,
            command_timeout_ms: 5000,
            inter_command_delay_ms: 10,
            adapter_name_tokens: ["OBD", "ELM", "V-LINK", "VLINK", "VEEPEAK"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl TransportConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }
}
