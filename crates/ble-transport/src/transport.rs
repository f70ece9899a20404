//! Queued command/response transport
//!
//! One worker task per link services commands strictly FIFO with a single
//! command in flight. A separate pump task feeds notification chunks into the
//! exchange slot and reports link loss.

use async_trait::async_trait;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use obd_protocol::{encode_command, ConnectionState};

use crate::config::TransportConfig;
use crate::device::{filter_adapters, DeviceDescriptor};
use crate::error::TransportError;
use crate::exchange::{ChunkOutcome, Exchange};
use crate::observers::{StateObservers, StateSubscription};
use crate::radio::{select_characteristics, BleLink, BleRadio, GattCharacteristic, LinkEvent};

/// Result of one command exchange
pub type CommandResult = Result<String, TransportError>;

/// Command/response primitive the session layer drives
#[async_trait]
pub trait ObdTransport: Send + Sync + 'static {
    /// Scan for adapters; `None` uses the configured window
    async fn scan(&self, window: Option<Duration>) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Open a link to `device_id`, tearing down any current link first
    async fn connect(&self, device_id: &str) -> Result<(), TransportError>;

    /// Queue a command with the default deadline and wait for its frame
    async fn send_command(&self, command: &str) -> CommandResult;

    /// Queue a command with an explicit deadline and wait for its frame
    async fn send_command_with_timeout(&self, command: &str, timeout: Duration) -> CommandResult;

    /// Fail everything pending, close the link and report `Disconnected`
    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    /// Observe state changes, starting with the current state
    fn subscribe(&self) -> StateSubscription;

    /// Move to a session-driven state while the link is up
    fn set_session_state(&self, state: ConnectionState) -> Result<(), TransportError>;
}

struct PendingCommand {
    command: String,
    issued_at: Instant,
    timeout: Duration,
    reply: oneshot::Sender<CommandResult>,
}

struct ActiveLink {
    id: u64,
    device_id: String,
    link: Arc<dyn BleLink>,
    commands: mpsc::UnboundedSender<PendingCommand>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    pump: JoinHandle<()>,
}

struct Inner<R: BleRadio> {
    radio: R,
    config: TransportConfig,
    observers: StateObservers,
    link: Mutex<Option<ActiveLink>>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    next_link_id: AtomicU64,
}

/// ELM327 transport over a BLE radio stack
pub struct BleTransport<R: BleRadio> {
    inner: Arc<Inner<R>>,
}

impl<R: BleRadio> Clone for BleTransport<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: BleRadio> BleTransport<R> {
    pub fn new(radio: R, config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                radio,
                config,
                observers: StateObservers::new(),
                link: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                next_link_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn radio(&self) -> &R {
        &self.inner.radio
    }

    /// Id of the device the link is open to
    pub fn connected_device(&self) -> Option<String> {
        self.inner.link.lock().as_ref().map(|l| l.device_id.clone())
    }

    async fn establish(
        &self,
        device_id: &str,
    ) -> Result<
        (
            Arc<dyn BleLink>,
            GattCharacteristic,
            mpsc::UnboundedReceiver<LinkEvent>,
        ),
        TransportError,
    > {
        let link = self.inner.radio.connect(device_id).await?;

        let prepared = async {
            let characteristics = link.discover().await?;
            let (write, notify) = select_characteristics(&characteristics)?;
            debug!(
                "Using write characteristic {} and notify characteristic {}",
                write.uuid, notify.uuid
            );
            let events = link.subscribe(&notify).await?;
            Ok::<_, TransportError>((write, events))
        }
        .await;

        match prepared {
            Ok((write, events)) => Ok((link, write, events)),
            Err(err) => {
                if let Err(close_err) = link.disconnect().await {
                    warn!("Failed to close rejected link: {}", close_err);
                }
                Err(err)
            }
        }
    }

    async fn teardown(active: ActiveLink) {
        active.cancel.cancel();
        active.pump.abort();
        if let Err(err) = active.worker.await {
            error!("Command worker for link {} failed: {}", active.id, err);
        }
        if let Err(err) = active.link.disconnect().await {
            warn!("Error closing link to {}: {}", active.device_id, err);
        }
    }
}

impl<R: BleRadio> Inner<R> {
    /// Called by the pump when the radio reports the link gone
    async fn handle_link_lost(&self, link_id: u64) {
        let lost = {
            let mut slot = self.link.lock();
            if slot.as_ref().map(|l| l.id) != Some(link_id) {
                return;
            }
            let lost = slot.take();
            self.observers.set(ConnectionState::Disconnected);
            lost
        };

        let Some(active) = lost else {
            return;
        };
        warn!("Link to {} lost", active.device_id);
        counter!("obd_link_losses_total").increment(1);

        active.cancel.cancel();
        if let Err(err) = active.worker.await {
            error!("Command worker for link {} failed: {}", active.id, err);
        }
        if let Err(err) = active.link.disconnect().await {
            debug!("Closing lost link to {}: {}", active.device_id, err);
        }
    }
}

#[async_trait]
impl<R: BleRadio> ObdTransport for BleTransport<R> {
    async fn scan(&self, window: Option<Duration>) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let inner = &self.inner;
        let window = window.unwrap_or_else(|| inner.config.scan_window());

        match inner.radio.request_permissions().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Bluetooth permission denied, scan skipped");
                return Ok(Vec::new());
            }
            Err(err) => {
                error!("Bluetooth unavailable: {}", err);
                inner
                    .observers
                    .transition(&[ConnectionState::Disconnected], ConnectionState::Error);
                return Err(TransportError::Scan(err.to_string()));
            }
        }

        let scanning = inner.observers.transition(
            &[ConnectionState::Disconnected, ConnectionState::Error],
            ConnectionState::Scanning,
        );
        info!("Scanning for OBD adapters ({}ms)", window.as_millis());

        match inner.radio.scan(window).await {
            Ok(advertisements) => {
                let devices = filter_adapters(advertisements, &inner.config.adapter_name_tokens);
                info!("Scan found {} adapter(s)", devices.len());
                if scanning {
                    inner
                        .observers
                        .transition(&[ConnectionState::Scanning], ConnectionState::Disconnected);
                }
                Ok(devices)
            }
            Err(err) => {
                error!("Scan failed: {}", err);
                if scanning {
                    inner
                        .observers
                        .transition(&[ConnectionState::Scanning], ConnectionState::Error);
                }
                match err {
                    TransportError::Scan(_) => Err(err),
                    other => Err(TransportError::Scan(other.to_string())),
                }
            }
        }
    }

    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let previous = self.inner.link.lock().take();
        if let Some(previous) = previous {
            info!("Closing link to {} before reconnecting", previous.device_id);
            Self::teardown(previous).await;
        }

        self.inner.observers.set(ConnectionState::Connecting);
        info!("Connecting to {}", device_id);

        let (link, write, events) = match self.establish(device_id).await {
            Ok(established) => established,
            Err(err) => {
                error!("Connection to {} failed: {}", device_id, err);
                self.inner.observers.set(ConnectionState::Error);
                return Err(err);
            }
        };

        let id = self.inner.next_link_id.fetch_add(1, Ordering::Relaxed);
        let exchange = Arc::new(Mutex::new(Exchange::new()));
        let (commands, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            Arc::clone(&link),
            write,
            Arc::clone(&exchange),
            queue,
            cancel.clone(),
            self.inner.config.inter_command_delay(),
        ));

        {
            // Pump may report loss immediately; it must find this link in the slot
            let mut slot = self.inner.link.lock();
            let pump = tokio::spawn(run_pump(
                Arc::downgrade(&self.inner),
                id,
                exchange,
                events,
            ));
            *slot = Some(ActiveLink {
                id,
                device_id: device_id.to_string(),
                link,
                commands,
                cancel,
                worker,
                pump,
            });
            self.inner.observers.set(ConnectionState::Connected);
        }

        info!("Connected to {}", device_id);
        Ok(())
    }

    async fn send_command(&self, command: &str) -> CommandResult {
        self.send_command_with_timeout(command, self.inner.config.command_timeout())
            .await
    }

    async fn send_command_with_timeout(&self, command: &str, timeout: Duration) -> CommandResult {
        let (reply, response) = oneshot::channel();
        let pending = PendingCommand {
            command: command.to_string(),
            issued_at: Instant::now(),
            timeout,
            reply,
        };

        {
            let slot = self.inner.link.lock();
            let active = slot.as_ref().ok_or(TransportError::NotConnected)?;
            active
                .commands
                .send(pending)
                .map_err(|_| TransportError::LinkLost)?;
        }

        response.await.unwrap_or(Err(TransportError::LinkLost))
    }

    async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let active = self.inner.link.lock().take();
        if let Some(active) = active {
            info!("Disconnecting from {}", active.device_id);
            Self::teardown(active).await;
        }
        self.inner.observers.set(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        self.inner.observers.current()
    }

    fn subscribe(&self) -> StateSubscription {
        self.inner.observers.subscribe()
    }

    fn set_session_state(&self, state: ConnectionState) -> Result<(), TransportError> {
        if !state.is_session_driven() {
            return Err(TransportError::InvalidTransition {
                from: self.inner.observers.current(),
                to: state,
            });
        }

        let slot = self.inner.link.lock();
        if slot.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.inner.observers.set(state);
        Ok(())
    }
}

async fn run_worker(
    link: Arc<dyn BleLink>,
    write: GattCharacteristic,
    exchange: Arc<Mutex<Exchange>>,
    mut queue: mpsc::UnboundedReceiver<PendingCommand>,
    cancel: CancellationToken,
    inter_command_delay: Duration,
) {
    loop {
        let pending = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(pending) => pending,
                None => break,
            },
        };

        if pending.reply.is_closed() {
            debug!("Skipping {}, caller went away", pending.command);
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::LinkLost),
            result = exchange_command(&*link, &write, &exchange, &pending.command, pending.timeout) => result,
        };

        counter!("obd_commands_sent_total").increment(1);
        histogram!("obd_command_latency_seconds").record(pending.issued_at.elapsed().as_secs_f64());
        let _ = pending.reply.send(result);

        if cancel.is_cancelled() {
            break;
        }
        if !inter_command_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep(inter_command_delay) => {}
            }
        }
    }

    queue.close();
    let mut failed = 0;
    while let Ok(pending) = queue.try_recv() {
        let _ = pending.reply.send(Err(TransportError::LinkLost));
        failed += 1;
    }
    if failed > 0 {
        debug!("Failed {} queued command(s) on link close", failed);
    }
    exchange.lock().reset();
}

/// Write one command and wait for its prompt-terminated frame
async fn exchange_command(
    link: &dyn BleLink,
    write: &GattCharacteristic,
    exchange: &Mutex<Exchange>,
    command: &str,
    timeout: Duration,
) -> CommandResult {
    let frame = exchange.lock().begin(command);
    let deadline = Instant::now() + timeout;
    let timed_out = || TransportError::CommandTimeout {
        command: command.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    };

    debug!("Sending {}", command);
    let payload = encode_command(command);
    let written = time::timeout_at(deadline, link.write(write, &payload, write.properties.write)).await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            exchange.lock().abandon();
            return Err(err);
        }
        Err(_) => {
            exchange.lock().abandon();
            counter!("obd_command_timeouts_total").increment(1);
            return Err(timed_out());
        }
    }

    match time::timeout_at(deadline, frame).await {
        Ok(Ok(response)) => {
            debug!("{} -> {:?}", command, response);
            Ok(response)
        }
        Ok(Err(_)) => Err(TransportError::LinkLost),
        Err(_) => {
            exchange.lock().abandon();
            counter!("obd_command_timeouts_total").increment(1);
            warn!("Command {} timed out after {}ms", command, timeout.as_millis());
            Err(timed_out())
        }
    }
}

async fn run_pump<R: BleRadio>(
    inner: Weak<Inner<R>>,
    link_id: u64,
    exchange: Arc<Mutex<Exchange>>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Notification(chunk) => {
                let outcome = exchange.lock().push_chunk(&chunk);
                if let ChunkOutcome::Orphaned(frame) = outcome {
                    debug!("Discarding frame with no command waiting: {:?}", frame);
                }
            }
            LinkEvent::Disconnected => break,
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_link_lost(link_id).await;
    }
}
