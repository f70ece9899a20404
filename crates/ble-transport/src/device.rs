//! Scan results and adapter filtering

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How the adapter is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolKind {
    Ble,
    Wifi,
}

/// Raw advertisement as reported by the radio stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Transport-assigned identifier (address on BLE)
    pub id: String,
    /// Advertised local name, if any
    pub local_name: Option<String>,
    /// Received signal strength (dBm)
    pub rssi: Option<i16>,
    pub protocol: ProtocolKind,
}

/// Candidate adapter returned from a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub display_name: String,
    pub protocol: ProtocolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i16>,
}

/// Check whether an advertised name looks like an OBD adapter
pub fn matches_adapter_name(name: &str, tokens: &[String]) -> bool {
    let upper = name.to_uppercase();
    tokens
        .iter()
        .any(|token| upper.contains(&token.to_uppercase()))
}

/// Keep advertisers that look like OBD adapters, one entry per id
///
/// Entries without an id or name are skipped. A repeated id replaces the
/// earlier entry in place so the newest signal strength wins.
pub fn filter_adapters(
    advertisements: impl IntoIterator<Item = Advertisement>,
    tokens: &[String],
) -> Vec<DeviceDescriptor> {
    let mut devices: Vec<DeviceDescriptor> = Vec::new();

    for advertisement in advertisements {
        let name = match advertisement.local_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                debug!("Skipping unnamed advertiser {:?}", advertisement.id);
                continue;
            }
        };
        if advertisement.id.trim().is_empty() {
            debug!("Skipping advertiser {:?} without id", name);
            continue;
        }
        if !matches_adapter_name(&name, tokens) {
            continue;
        }

        let descriptor = DeviceDescriptor {
            id: advertisement.id,
            display_name: name,
            protocol: advertisement.protocol,
            signal_strength: advertisement.rssi,
        };
        match devices.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => *existing = descriptor,
            None => devices.push(descriptor),
        }
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportConfig;

    fn advert(id: &str, name: Option<&str>, rssi: i16) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            local_name: name.map(String::from),
            rssi: Some(rssi),
            protocol: ProtocolKind::Ble,
        }
    }

    #[test]
    fn test_name_heuristic() {
        let tokens = TransportConfig::default().adapter_name_tokens;
        assert!(matches_adapter_name("OBDII", &tokens));
        assert!(matches_adapter_name("elm327 v1.5", &tokens));
        assert!(matches_adapter_name("IOS-Vlink", &tokens));
        assert!(matches_adapter_name("Veepeak OBDCheck", &tokens));
        assert!(!matches_adapter_name("Pixel Buds", &tokens));
    }

    #[test]
    fn test_filter_skips_malformed_and_foreign() {
        let tokens = TransportConfig::default().adapter_name_tokens;
        let devices = filter_adapters(
            vec![
                advert("AA:01", Some("OBDII"), -60),
                advert("AA:02", None, -40),
                advert("", Some("ELM327"), -40),
                advert("AA:03", Some("Headphones"), -30),
                advert("AA:04", Some("   "), -30),
            ],
            &tokens,
        );
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "AA:01");
        assert_eq!(devices[0].display_name, "OBDII");
        assert_eq!(devices[0].protocol, ProtocolKind::Ble);
    }

    #[test]
    fn test_filter_deduplicates_by_id() {
        let tokens = TransportConfig::default().adapter_name_tokens;
        let devices = filter_adapters(
            vec![
                advert("AA:01", Some("OBDII"), -80),
                advert("AA:05", Some("V-LINK"), -50),
                advert("AA:01", Some("OBDII"), -55),
            ],
            &tokens,
        );
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "AA:01");
        assert_eq!(devices[0].signal_strength, Some(-55));
    }
}
