//! OBD-II Session Controller
//!
//! Runs the ELM327 initialization handshake once a link is up, then polls a
//! configurable set of PIDs in sequential sweeps and publishes each sweep to
//! the telemetry store as one batch. Also reads and clears stored trouble
//! codes over the same command queue.

mod config;
mod controller;
mod diagnostics;
mod error;

pub use config::SessionConfig;
pub use controller::{parse_adapter_version, SessionController, SweepReport};
pub use error::SessionError;
