//! Telemetry Store
//!
//! Latest decoded value and a bounded rolling history per PID, published to
//! subscribers as immutable snapshots.

mod history;
mod store;

pub use history::{SampleHistory, DEFAULT_CAPACITY};
pub use store::{StoreConfig, TelemetrySnapshot, TelemetryStore};
