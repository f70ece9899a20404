//! In-memory scripted radio for tests
//!
//! `MockRadio` answers scans from a fixed advertisement list and hands out
//! `MockLink`s that reply to written commands through a responder closure,
//! split into notification chunks the way real adapters fragment frames.
//!
//! ```ignore
//! use ble_transport::mock::MockRadio;
//! use ble_transport::{BleTransport, ObdTransport, TransportConfig};
//!
//! # async fn demo() {
//! let radio = MockRadio::new().with_chunk_size(4);
//! let transport = BleTransport::new(radio.clone(), TransportConfig::default());
//! transport.connect("AA:BB").await.unwrap();
//! assert_eq!(transport.send_command("010D").await.unwrap(), "41 0D 32");
//! assert_eq!(radio.last_link().unwrap().writes(), vec!["010D"]);
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::device::Advertisement;
use crate::error::TransportError;
use crate::radio::{BleLink, BleRadio, CharacteristicProperties, GattCharacteristic, LinkEvent};

/// Maps a written command to the adapter's reply; `None` stays silent
pub type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Replies of a healthy ELM327 on a warm engine
pub fn elm327_reply(command: &str) -> Option<String> {
    let reply = match command {
        "ATZ" => "ELM327 v1.5",
        c if c.starts_with("AT") => "OK",
        "0104" => "41 04 80",
        "0105" => "41 05 5A",
        "0106" => "41 06 80",
        "0107" => "41 07 82",
        "010B" => "41 0B 21",
        "010C" => "41 0C 0F A0",
        "010D" => "41 0D 32",
        "010F" => "41 0F 46",
        "0110" => "41 10 01 F4",
        "0111" => "41 11 33",
        "0114" => "41 14 5A",
        "0142" => "41 42 36 B0",
        "03" => "43 01 33 00 00 00 00",
        "04" => "44",
        _ => "NO DATA",
    };
    Some(reply.to_string())
}

/// Write and notify characteristics on the common FFF0 service
pub fn default_characteristics() -> Vec<GattCharacteristic> {
    vec![
        GattCharacteristic {
            service: "0000fff0-0000-1000-8000-00805f9b34fb".to_string(),
            uuid: "0000fff2-0000-1000-8000-00805f9b34fb".to_string(),
            properties: CharacteristicProperties {
                write: true,
                write_without_response: true,
                ..Default::default()
            },
        },
        GattCharacteristic {
            service: "0000fff0-0000-1000-8000-00805f9b34fb".to_string(),
            uuid: "0000fff1-0000-1000-8000-00805f9b34fb".to_string(),
            properties: CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
        },
    ]
}

#[derive(Clone)]
struct Script {
    advertisements: Vec<Advertisement>,
    characteristics: Vec<GattCharacteristic>,
    responder: Responder,
    permissions: bool,
    scan_failure: Option<String>,
    connect_failure: Option<String>,
    chunk_size: usize,
    response_delay: Duration,
    /// Per-command delays overriding `response_delay`
    command_delays: Vec<(String, Duration)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            advertisements: Vec::new(),
            characteristics: default_characteristics(),
            responder: Arc::new(elm327_reply),
            permissions: true,
            scan_failure: None,
            connect_failure: None,
            chunk_size: 20,
            response_delay: Duration::ZERO,
            command_delays: Vec::new(),
        }
    }
}

/// Scripted radio; clones share the same script and link history
#[derive(Clone, Default)]
pub struct MockRadio {
    script: Arc<Mutex<Script>>,
    links: Arc<Mutex<Vec<MockLink>>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_advertisements(self, advertisements: Vec<Advertisement>) -> Self {
        self.script.lock().advertisements = advertisements;
        self
    }

    pub fn with_characteristics(self, characteristics: Vec<GattCharacteristic>) -> Self {
        self.script.lock().characteristics = characteristics;
        self
    }

    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.script.lock().responder = Arc::new(responder);
        self
    }

    /// Split replies into notifications of at most `size` bytes
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.script.lock().chunk_size = size.max(1);
        self
    }

    pub fn with_response_delay(self, delay: Duration) -> Self {
        self.script.lock().response_delay = delay;
        self
    }

    /// Delay replies to `command` only
    pub fn with_command_delay(self, command: &str, delay: Duration) -> Self {
        self.script
            .lock()
            .command_delays
            .push((command.to_string(), delay));
        self
    }

    pub fn deny_permissions(self) -> Self {
        self.script.lock().permissions = false;
        self
    }

    pub fn fail_scan(self, reason: &str) -> Self {
        self.script.lock().scan_failure = Some(reason.to_string());
        self
    }

    pub fn reject_connect(self, reason: &str) -> Self {
        self.script.lock().connect_failure = Some(reason.to_string());
        self
    }

    /// Most recently opened link
    pub fn last_link(&self) -> Option<MockLink> {
        self.links.lock().last().cloned()
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl BleRadio for MockRadio {
    async fn request_permissions(&self) -> Result<bool, TransportError> {
        Ok(self.script.lock().permissions)
    }

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let (failure, advertisements) = {
            let script = self.script.lock();
            (script.scan_failure.clone(), script.advertisements.clone())
        };
        if let Some(reason) = failure {
            return Err(TransportError::Scan(reason));
        }
        tokio::time::sleep(window).await;
        Ok(advertisements)
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn BleLink>, TransportError> {
        let script = self.script.lock().clone();
        if let Some(reason) = script.connect_failure {
            return Err(TransportError::Connect(reason));
        }
        if !script.advertisements.is_empty()
            && !script.advertisements.iter().any(|a| a.id == device_id)
        {
            return Err(TransportError::Connect(format!("unknown device {}", device_id)));
        }

        let link = MockLink::new(device_id, script);
        self.links.lock().push(link.clone());
        Ok(Arc::new(link))
    }
}

struct LinkState {
    device_id: String,
    script: Script,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    writes: Mutex<Vec<String>>,
    severed: AtomicBool,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

/// Scripted adapter link with write instrumentation
#[derive(Clone)]
pub struct MockLink {
    state: Arc<LinkState>,
}

impl MockLink {
    fn new(device_id: &str, script: Script) -> Self {
        Self {
            state: Arc::new(LinkState {
                device_id: device_id.to_string(),
                script,
                events: Mutex::new(None),
                writes: Mutex::new(Vec::new()),
                severed: AtomicBool::new(false),
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.state.device_id
    }

    /// Commands written so far, terminator stripped
    pub fn writes(&self) -> Vec<String> {
        self.state.writes.lock().clone()
    }

    /// Highest number of answered commands awaiting their reply at once
    pub fn max_outstanding(&self) -> usize {
        self.state.max_outstanding.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Inject an unsolicited notification chunk
    pub fn notify(&self, chunk: &[u8]) {
        if let Some(events) = self.state.events.lock().as_ref() {
            let _ = events.send(LinkEvent::Notification(chunk.to_vec()));
        }
    }

    /// Drop the link as if the adapter lost power
    pub fn sever(&self) {
        self.state.severed.store(true, Ordering::SeqCst);
        if let Some(events) = self.state.events.lock().take() {
            let _ = events.send(LinkEvent::Disconnected);
        }
    }
}

#[async_trait]
impl BleLink for MockLink {
    async fn discover(&self) -> Result<Vec<GattCharacteristic>, TransportError> {
        Ok(self.state.script.characteristics.clone())
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError> {
        if !characteristic.properties.is_notifiable() {
            return Err(TransportError::Connect(format!(
                "{} does not support notifications",
                characteristic.uuid
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn write(
        &self,
        _characteristic: &GattCharacteristic,
        data: &[u8],
        _with_response: bool,
    ) -> Result<(), TransportError> {
        if self.state.severed.load(Ordering::SeqCst) {
            return Err(TransportError::Write("link severed".to_string()));
        }

        let command = String::from_utf8_lossy(data).trim_end_matches('\r').to_string();
        self.state.writes.lock().push(command.clone());

        let Some(reply) = (self.state.script.responder)(&command) else {
            return Ok(());
        };

        let outstanding = self.state.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_outstanding
            .fetch_max(outstanding, Ordering::SeqCst);

        let delay = self
            .state
            .script
            .command_delays
            .iter()
            .find(|(delayed, _)| *delayed == command)
            .map_or(self.state.script.response_delay, |(_, delay)| *delay);

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let frame = format!("{}\r\r>", reply);
            if let Some(events) = state.events.lock().as_ref() {
                for chunk in frame.as_bytes().chunks(state.script.chunk_size) {
                    let _ = events.send(LinkEvent::Notification(chunk.to_vec()));
                }
            }
            state.outstanding.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.severed.store(true, Ordering::SeqCst);
        self.state.events.lock().take();
        Ok(())
    }
}
