//! BLE Transport for ELM327 Adapters
//!
//! Owns the physical link to the adapter and turns the notify/write
//! characteristic pair into a queued command/response primitive with
//! per-command deadlines and a connection state machine.
//!
//! The platform radio is injected through [`BleRadio`]; enable the
//! `btleplug` feature for the desktop stack or `mock` for a scripted radio.

#[cfg(feature = "btleplug")]
mod btle;
mod config;
mod device;
mod error;
mod exchange;
mod observers;
mod radio;
mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "btleplug")]
pub use btle::{BtleplugLink, BtleplugRadio};
pub use config::TransportConfig;
pub use device::{filter_adapters, matches_adapter_name, Advertisement, DeviceDescriptor, ProtocolKind};
pub use error::TransportError;
pub use observers::{StateObservers, StateSubscription};
pub use radio::{
    select_characteristics, BleLink, BleRadio, CharacteristicProperties, GattCharacteristic,
    LinkEvent,
};
pub use transport::{BleTransport, CommandResult, ObdTransport};
