//! Session Controller
//!
//! Watches the transport state, runs the ELM327 init handshake when a link
//! comes up, then drives a sequential poll loop that publishes one batch of
//! samples per sweep into the telemetry store.

use metrics::histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ble_transport::ObdTransport;
use obd_protocol::{
    check_acknowledgement, decode_pid, init_sequence, unix_time_ms, ConnectionState,
    TelemetrySample, RESET_COMMAND,
};
use telemetry_store::TelemetryStore;

use crate::config::SessionConfig;
use crate::error::SessionError;

/// Outcome of one sweep over the tracked PIDs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// PIDs queried
    pub attempted: usize,
    /// Samples published
    pub decoded: usize,
    /// Reads that failed or did not decode
    pub failed: usize,
}

impl SweepReport {
    /// Every read in the sweep came back empty-handed
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.decoded == 0
    }
}

struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives initialization and polling over one transport
pub struct SessionController<T: ObdTransport> {
    pub(crate) transport: Arc<T>,
    store: Arc<TelemetryStore>,
    config: SessionConfig,
    adapter_version: Mutex<Option<String>>,
    polling: Mutex<Option<PollHandle>>,
    /// Consecutive sweeps that decoded nothing
    failed_sweeps: AtomicU32,
}

/// Pull the firmware banner out of the `ATZ` reply
///
/// With echo still on the reply starts with the command itself.
pub fn parse_adapter_version(response: &str) -> Option<String> {
    let trimmed = response.trim();
    let banner = match trimmed.find("ELM") {
        Some(start) => &trimmed[start..],
        None => trimmed.strip_prefix(RESET_COMMAND).unwrap_or(trimmed).trim(),
    };
    if banner.is_empty() {
        None
    } else {
        Some(banner.to_string())
    }
}

impl<T: ObdTransport> SessionController<T> {
    pub fn new(transport: Arc<T>, store: Arc<TelemetryStore>, config: SessionConfig) -> Self {
        info!(
            "Session controller created with {} tracked PIDs",
            config.tracked_pids.len()
        );
        Self {
            transport,
            store,
            config,
            adapter_version: Mutex::new(None),
            polling: Mutex::new(None),
            failed_sweeps: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    /// Firmware banner reported by the last successful reset
    pub fn adapter_version(&self) -> Option<String> {
        self.adapter_version.lock().clone()
    }

    /// Sweeps in a row that produced no sample
    pub fn failed_sweeps(&self) -> u32 {
        self.failed_sweeps.load(Ordering::Relaxed)
    }

    pub fn is_polling(&self) -> bool {
        self.polling
            .lock()
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    /// Mirror transport states into the store and react to link changes
    ///
    /// Returns when `shutdown` fires or the transport goes away.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut states = self.transport.subscribe();
        info!("Session controller watching transport state");

        loop {
            let state = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = states.recv() => match next {
                    Some(state) => state,
                    None => break,
                },
            };

            self.store.set_connection_state(state);
            match state {
                ConnectionState::Connected => {
                    let session = Arc::clone(&self);
                    tokio::spawn(async move {
                        session.establish().await;
                    });
                }
                ConnectionState::Disconnected | ConnectionState::Error => self.stop_polling(),
                _ => {}
            }
        }

        self.stop_polling();
        info!("Session controller stopped");
    }

    async fn establish(self: Arc<Self>) {
        if self.initialize().await.is_err() {
            return;
        }
        if let Err(err) = self.start_polling() {
            warn!("Could not start polling: {}", err);
        }
    }

    /// Run the init sequence, moving through `Initializing` to `Ready`
    ///
    /// Any failure records a user-visible message, reports `Error` and closes
    /// the link.
    pub async fn initialize(&self) -> Result<Option<String>, SessionError> {
        self.transport
            .set_session_state(ConnectionState::Initializing)?;
        info!("Initializing adapter");

        match self.run_init_sequence().await {
            Ok(version) => {
                *self.adapter_version.lock() = version.clone();
                self.transport.set_session_state(ConnectionState::Ready)?;
                info!(
                    "Adapter ready ({})",
                    version.as_deref().unwrap_or("unknown firmware")
                );
                Ok(version)
            }
            Err(err) => {
                error!("Adapter initialization failed: {}", err);
                self.store
                    .record_failure(format!("Connection failed: {}", err));
                if let Err(state_err) = self.transport.set_session_state(ConnectionState::Error) {
                    debug!("Link already gone: {}", state_err);
                }
                self.transport.disconnect().await;
                Err(err)
            }
        }
    }

    async fn run_init_sequence(&self) -> Result<Option<String>, SessionError> {
        let mut version = None;

        for command in init_sequence(self.config.protocol) {
            let command = command.as_str();
            let sent = if command == RESET_COMMAND {
                self.transport
                    .send_command_with_timeout(command, self.config.reset_timeout())
                    .await
            } else {
                self.transport.send_command(command).await
            };
            let response = sent.map_err(|err| SessionError::InitFailed {
                command: command.to_string(),
                reason: err.to_string(),
            })?;
            check_acknowledgement(command, &response).map_err(|err| {
                SessionError::InitFailed {
                    command: command.to_string(),
                    reason: err.to_string(),
                }
            })?;

            debug!("{} acknowledged: {:?}", command, response);
            if command == RESET_COMMAND {
                version = parse_adapter_version(&response);
            }
        }

        Ok(version)
    }

    /// Report `Streaming` and spawn the poll loop if it is not running
    pub fn start_polling(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut polling = self.polling.lock();
        if polling.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return Ok(());
        }

        self.transport
            .set_session_state(ConnectionState::Streaming)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).poll_loop(cancel.clone()));
        *polling = Some(PollHandle { cancel, task });
        Ok(())
    }

    /// Halt the poll loop; it exits at its next check
    pub fn stop_polling(&self) {
        if let Some(handle) = self.polling.lock().take() {
            info!("Stopping poll loop");
            handle.cancel.cancel();
        }
    }

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Polling {} PIDs with {}ms between sweeps",
            self.config.tracked_pids.len(),
            self.config.cycle_delay_ms
        );
        let threshold = self.config.unhealthy_sweep_threshold.max(1);
        self.failed_sweeps.store(0, Ordering::Relaxed);

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let state = self.transport.state();
            if !state.can_poll() {
                info!("Transport is {}, poll loop exiting", state);
                break;
            }

            let report = self.poll_once().await;
            if report.all_failed() {
                let failed_sweeps = self.failed_sweeps.fetch_add(1, Ordering::Relaxed) + 1;
                if failed_sweeps % threshold == 0 {
                    warn!(
                        "{} consecutive sweeps without data, adapter link looks unhealthy",
                        failed_sweeps
                    );
                }
            } else {
                self.failed_sweeps.store(0, Ordering::Relaxed);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_delay()) => {}
            }
        }

        debug!("Poll loop stopped");
    }

    /// Read every tracked PID once and publish the decoded batch
    pub async fn poll_once(&self) -> SweepReport {
        let started = Instant::now();
        let timestamp_ms = unix_time_ms();
        let mut report = SweepReport {
            attempted: self.config.tracked_pids.len(),
            ..Default::default()
        };
        let mut samples = Vec::with_capacity(report.attempted);

        for pid in &self.config.tracked_pids {
            debug!("Querying PID {:02X}", pid.as_hex());
            let response = match self.transport.send_command(pid.code()).await {
                Ok(response) => response,
                Err(err) => {
                    warn!("PID {:02X} query failed: {}", pid.as_hex(), err);
                    report.failed += 1;
                    if err.is_link_error() {
                        break;
                    }
                    continue;
                }
            };

            match decode_pid(pid.code(), &response) {
                Some(value) => {
                    samples.push(TelemetrySample::new(*pid, value, timestamp_ms).with_raw(response))
                }
                None => {
                    debug!("PID {:02X} gave no value: {:?}", pid.as_hex(), response);
                    report.failed += 1;
                }
            }
        }

        report.decoded = samples.len();
        self.store.publish_samples(samples);
        histogram!("obd_sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        report
    }
}
