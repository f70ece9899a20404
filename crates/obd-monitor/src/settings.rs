//! Layered service settings
//!
//! Built-in defaults, then an optional TOML file, then `OBD_MONITOR__*`
//! environment variables (`OBD_MONITOR__SESSION__CYCLE_DELAY_MS=250`).

use alerting::AlertConfig;
use ble_transport::TransportConfig;
use config::{Config, ConfigError, Environment, File};
use obd_session::SessionConfig;
use serde::{Deserialize, Serialize};
use telemetry_store::StoreConfig;

/// Default settings file looked up next to the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "obd-monitor.toml";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub log_level: String,
    pub log_format: LogFormat,
    /// Read API bind address
    pub http_addr: String,
    /// Adapter to connect to; the strongest matching advertiser when unset
    pub device_id: Option<String>,
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub store: StoreConfig,
    pub alerts: AlertConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            http_addr: "0.0.0.0:8080".to_string(),
            device_id: None,
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            store: StoreConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings; `path` must exist when given explicitly
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("OBD_MONITOR").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::Pid;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.http_addr, "0.0.0.0:8080");
        assert_eq!(settings.session.cycle_delay_ms, 100);
        assert_eq!(settings.store.history_capacity, 100);
        assert_eq!(settings.transport.command_timeout_ms, 5000);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("obd-monitor-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_format = "json"
device_id = "00:1D:A5:68:98:8B"

[session]
cycle_delay_ms = 250
tracked_pids = ["010C", "010D"]

[alerts]
cooldown_ms = 10000
"#
        )
        .unwrap();

        let settings = Settings::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.device_id.as_deref(), Some("00:1D:A5:68:98:8B"));
        assert_eq!(settings.session.cycle_delay_ms, 250);
        assert_eq!(settings.session.tracked_pids, vec![Pid::Rpm, Pid::Speed]);
        assert_eq!(settings.session.reset_timeout_ms, 10_000);
        assert_eq!(settings.alerts.cooldown_ms, 10_000);
        assert_eq!(settings.alerts.rules.len(), 1);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some("/nonexistent/obd-monitor")).is_err());
    }
}
