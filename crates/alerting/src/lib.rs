//! Alerting System
//!
//! Threshold rules evaluated against published telemetry, with per-rule
//! cooldown so a sustained fault is reported once per window.

mod manager;
mod monitor;
mod rules;

pub use manager::{AlertConfig, AlertManager, AlertState, Anomaly};
pub use monitor::watch_telemetry;
pub use rules::{validate_rules, AnomalyRule, Comparison, RuleError, Severity};
