//! Radio stack seam
//!
//! The transport only needs scan results, a link, characteristic discovery,
//! writes, and a stream of notification chunks. Platform stacks implement
//! [`BleRadio`] and [`BleLink`]; the transport never touches them directly.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::device::Advertisement;
use crate::error::TransportError;

/// Service UUID fragments used by common ELM327 BLE clones
const KNOWN_SERVICE_FRAGMENTS: [&str; 3] = ["fff0", "18f0", "e7810a71"];

/// GATT characteristic capability flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn is_notifiable(&self) -> bool {
        self.notify || self.indicate
    }
}

/// A discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Owning service UUID
    pub service: String,
    pub uuid: String,
    pub properties: CharacteristicProperties,
}

/// Something the radio stack reports on an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes from the notify characteristic, arbitrary chunking
    Notification(Vec<u8>),
    /// The peer or the stack dropped the link
    Disconnected,
}

/// Platform radio: discovery and link establishment
#[async_trait]
pub trait BleRadio: Send + Sync + 'static {
    /// Check or request the permissions scanning needs
    async fn request_permissions(&self) -> Result<bool, TransportError>;

    /// Listen for advertisements for `window`, returning everything seen
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Open a link to a previously scanned device
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn BleLink>, TransportError>;
}

/// One open link to a peripheral
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Discover services and return every characteristic
    async fn discover(&self) -> Result<Vec<GattCharacteristic>, TransportError>;

    /// Enable notifications; the receiver ends after `LinkEvent::Disconnected`
    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError>;

    /// Write bytes to a characteristic
    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;

    /// Close the link
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Pick the write and notify characteristics used for the ELM327 conversation
///
/// A known OBD service that offers both wins, then the first service that
/// offers both, then the first writable and first notifiable anywhere.
pub fn select_characteristics(
    characteristics: &[GattCharacteristic],
) -> Result<(GattCharacteristic, GattCharacteristic), TransportError> {
    let pair_in = |service: &str| {
        let in_service = || characteristics.iter().filter(move |c| c.service == service);
        let write = in_service().find(|c| c.properties.is_writable())?;
        let notify = in_service().find(|c| c.properties.is_notifiable())?;
        Some((write.clone(), notify.clone()))
    };

    let mut services: Vec<&str> = Vec::new();
    for characteristic in characteristics {
        if !services.contains(&characteristic.service.as_str()) {
            services.push(&characteristic.service);
        }
    }

    let known = services.iter().find(|service| {
        let lower = service.to_ascii_lowercase();
        KNOWN_SERVICE_FRAGMENTS.iter().any(|f| lower.contains(f))
    });
    if let Some(pair) = known.and_then(|service| pair_in(service)) {
        return Ok(pair);
    }
    if let Some(pair) = services.iter().find_map(|service| pair_in(service)) {
        return Ok(pair);
    }

    let write = characteristics
        .iter()
        .find(|c| c.properties.is_writable())
        .ok_or_else(|| TransportError::Connect("no writable characteristic found".to_string()))?;
    let notify = characteristics
        .iter()
        .find(|c| c.properties.is_notifiable())
        .ok_or_else(|| {
            TransportError::Connect("no notifiable characteristic found".to_string())
        })?;
    Ok((write.clone(), notify.clone()))
}
