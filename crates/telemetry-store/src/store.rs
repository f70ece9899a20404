//! Telemetry Store
//!
//! Writers apply a whole batch under one lock and swap in a new immutable
//! snapshot, so subscribers never observe a half-applied sweep.

use metrics::{counter, gauge};
use obd_protocol::{ConnectionState, Pid, TelemetrySample};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::history::{SampleHistory, DEFAULT_CAPACITY};

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Samples kept per PID
    pub history_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Immutable view of the store at one revision
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub connection_state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Last user-visible failure, cleared on the next successful publish
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub latest_values: BTreeMap<Pid, f64>,
    /// Oldest first
    pub history: BTreeMap<Pid, Vec<TelemetrySample>>,
    /// Timestamp of the newest published sample
    pub last_update_ms: Option<u64>,
    /// Bumped on every change
    pub revision: u64,
}

impl TelemetrySnapshot {
    pub fn value(&self, pid: Pid) -> Option<f64> {
        self.latest_values.get(&pid).copied()
    }

    /// Value of `pid` only if the newest batch carried it
    pub fn fresh_value(&self, pid: Pid) -> Option<f64> {
        let newest = self.history.get(&pid)?.last()?;
        (Some(newest.timestamp_ms) == self.last_update_ms).then_some(newest.value)
    }
}

struct StoreState {
    connection_state: ConnectionState,
    device_name: Option<String>,
    last_error: Option<String>,
    latest_values: BTreeMap<Pid, f64>,
    history: BTreeMap<Pid, SampleHistory>,
    last_update_ms: Option<u64>,
    revision: u64,
}

impl StoreState {
    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            connection_state: self.connection_state,
            device_name: self.device_name.clone(),
            last_error: self.last_error.clone(),
            latest_values: self.latest_values.clone(),
            history: self
                .history
                .iter()
                .map(|(pid, history)| (*pid, history.to_vec()))
                .collect(),
            last_update_ms: self.last_update_ms,
            revision: self.revision,
        }
    }
}

/// Process-wide table of latest values and bounded history
pub struct TelemetryStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
    snapshots: watch::Sender<Arc<TelemetrySnapshot>>,
}

impl TelemetryStore {
    pub fn new(config: StoreConfig) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(TelemetrySnapshot::default()));
        Self {
            config,
            state: Mutex::new(StoreState {
                connection_state: ConnectionState::Disconnected,
                device_name: None,
                last_error: None,
                latest_values: BTreeMap::new(),
                history: BTreeMap::new(),
                last_update_ms: None,
                revision: 0,
            }),
            snapshots,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn commit(&self, state: &mut StoreState) {
        state.revision += 1;
        self.snapshots.send_replace(Arc::new(state.snapshot()));
    }

    /// Mirror the transport's connection state
    pub fn set_connection_state(&self, connection_state: ConnectionState) {
        let mut state = self.state.lock();
        if state.connection_state == connection_state {
            return;
        }
        debug!("Store connection state -> {}", connection_state);
        state.connection_state = connection_state;
        if connection_state == ConnectionState::Connecting {
            state.last_error = None;
        }
        self.commit(&mut state);
    }

    pub fn set_device_name(&self, name: Option<String>) {
        let mut state = self.state.lock();
        if state.device_name == name {
            return;
        }
        state.device_name = name;
        self.commit(&mut state);
    }

    /// Record a user-visible failure message
    pub fn record_failure(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        state.last_error = Some(message.into());
        self.commit(&mut state);
    }

    /// Apply one sweep's samples as a single update; empty batches are ignored
    pub fn publish_samples(&self, samples: Vec<TelemetrySample>) {
        if samples.is_empty() {
            return;
        }

        let count = samples.len();
        let capacity = self.config.history_capacity;
        let mut state = self.state.lock();
        for sample in samples {
            state.latest_values.insert(sample.pid, sample.value);
            state.last_update_ms = Some(
                state
                    .last_update_ms
                    .map_or(sample.timestamp_ms, |t| t.max(sample.timestamp_ms)),
            );
            state
                .history
                .entry(sample.pid)
                .or_insert_with(|| SampleHistory::new(capacity))
                .push(sample);
        }
        state.last_error = None;
        self.commit(&mut state);
        drop(state);

        counter!("obd_samples_published_total").increment(count as u64);
        gauge!("obd_tracked_pids").set(self.snapshots.borrow().latest_values.len() as f64);
        debug!("Published {} samples", count);
    }

    /// Drop all values and history, keeping connection details
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.latest_values.clear();
        state.history.clear();
        state.last_update_ms = None;
        self.commit(&mut state);
        info!("Telemetry history cleared");
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Last `limit` samples for `pid`, most recent first
    pub fn history(&self, pid: Pid, limit: usize) -> Vec<TelemetrySample> {
        self.state
            .lock()
            .history
            .get(&pid)
            .map(|h| h.read_last(limit))
            .unwrap_or_default()
    }

    /// Subscribe to snapshots; the current one is available immediately
    pub fn subscribe(&self) -> watch::Receiver<Arc<TelemetrySnapshot>> {
        self.snapshots.subscribe()
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
