//! Desktop radio stack backed by btleplug

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::device::{Advertisement, ProtocolKind};
use crate::error::TransportError;
use crate::radio::{BleLink, BleRadio, CharacteristicProperties, GattCharacteristic, LinkEvent};

fn peripheral_key(peripheral: &Peripheral) -> String {
    format!("{:?}", peripheral.id())
}

/// Radio backed by the first host Bluetooth adapter
pub struct BtleplugRadio {
    adapter: Adapter,
}

impl BtleplugRadio {
    pub async fn first_adapter() -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Scan("no Bluetooth adapter found".to_string()))?;

        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }
        Ok(Self { adapter })
    }

    async fn find(&self, device_id: &str) -> Result<Peripheral, TransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| peripheral_key(p) == device_id)
            .ok_or_else(|| TransportError::Connect(format!("device {} not in range", device_id)))
    }
}

#[async_trait]
impl BleRadio for BtleplugRadio {
    async fn request_permissions(&self) -> Result<bool, TransportError> {
        // Desktop stacks grant access at the OS level
        Ok(true)
    }

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        tokio::time::sleep(window).await;

        let peripherals = self.adapter.peripherals().await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", err);
        }
        let peripherals = peripherals.map_err(|e| TransportError::Scan(e.to_string()))?;

        let mut advertisements = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(err) => {
                    debug!("Skipping peripheral without properties: {}", err);
                    continue;
                }
            };
            advertisements.push(Advertisement {
                id: peripheral_key(&peripheral),
                local_name: properties.local_name,
                rssi: properties.rssi,
                protocol: ProtocolKind::Ble,
            });
        }
        Ok(advertisements)
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn BleLink>, TransportError> {
        let peripheral = self.find(device_id).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Arc::new(BtleplugLink {
            adapter: self.adapter.clone(),
            peripheral,
        }))
    }
}

/// Open btleplug peripheral connection
pub struct BtleplugLink {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugLink {
    fn resolve(&self, characteristic: &GattCharacteristic) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid.to_string() == characteristic.uuid
                    && c.service_uuid.to_string() == characteristic.service
            })
            .ok_or_else(|| {
                TransportError::Connect(format!("characteristic {} vanished", characteristic.uuid))
            })
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn discover(&self) -> Result<Vec<GattCharacteristic>, TransportError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| GattCharacteristic {
                service: c.service_uuid.to_string(),
                uuid: c.uuid.to_string(),
                properties: CharacteristicProperties {
                    write: c.properties.contains(CharPropFlags::WRITE),
                    write_without_response: c
                        .properties
                        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                    notify: c.properties.contains(CharPropFlags::NOTIFY),
                    indicate: c.properties.contains(CharPropFlags::INDICATE),
                },
            })
            .collect())
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError> {
        let target = self.resolve(characteristic)?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let mut central = self
            .adapter
            .events()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let id = self.peripheral.id();
        let uuid = target.uuid;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == uuid => {
                            if tx.send(LinkEvent::Notification(n.value)).is_err() {
                                return;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    event = central.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => break,
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            let _ = tx.send(LinkEvent::Disconnected);
        });
        Ok(rx)
    }

    async fn write(
        &self,
        characteristic: &GattCharacteristic,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let target = self.resolve(characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}
