//! Session configuration

use obd_protocol::{ObdProtocol, Pid};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the session controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// PIDs read on every sweep, in order
    pub tracked_pids: Vec<Pid>,
    /// Pause between the end of one sweep and the start of the next
    pub cycle_delay_ms: u64,
    /// Protocol selected at the end of the init sequence
    pub protocol: ObdProtocol,
    /// Deadline for `ATZ`; adapters reboot before answering
    pub reset_timeout_ms: u64,
    /// Consecutive all-failed sweeps before the link is reported unhealthy
    pub unhealthy_sweep_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracked_pids: Pid::DEFAULT_TRACKED.to_vec(),
            cycle_delay_ms: 100,
            protocol: ObdProtocol::Auto,
            reset_timeout_ms: 10_000,
            unhealthy_sweep_threshold: 5,
        }
    }
}

impl SessionConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}
