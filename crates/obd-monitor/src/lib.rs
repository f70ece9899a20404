//! OBD Monitor Service
//!
//! Wires the BLE transport, session controller, telemetry store and anomaly
//! monitor together and serves a JSON read API over the live state.

use alerting::{watch_telemetry, AlertManager};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ble_transport::{BleRadio, BleTransport, DeviceDescriptor, ObdTransport};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use obd_protocol::ConnectionState;
use obd_session::SessionController;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use telemetry_store::TelemetryStore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod routes;
pub mod settings;

pub use settings::{LogFormat, Settings};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<TelemetryStore>,
    pub alerts: Arc<Mutex<AlertManager>>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Prometheus renderer, absent when no recorder was installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        store: Arc<TelemetryStore>,
        alerts: Arc<Mutex<AlertManager>>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            store,
            alerts,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub adapter: AdapterHealth,
    pub pending_alerts: usize,
}

/// Adapter link as seen through the store
#[derive(Debug, Serialize)]
pub struct AdapterHealth {
    pub connection_state: ConnectionState,
    pub device_name: Option<String>,
    pub last_error: Option<String>,
    pub last_update_ms: Option<u64>,
    pub tracked_pids: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/telemetry/live", get(routes::telemetry::get_live))
        .route(
            "/api/v1/telemetry/history/:pid",
            get(routes::telemetry::get_history),
        )
        .route("/api/v1/alerts", get(routes::alerts::get_alerts))
        .route(
            "/api/v1/alerts/:id/ack",
            post(routes::alerts::acknowledge_alert),
        )
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.store.snapshot();
    let status = match snapshot.connection_state {
        ConnectionState::Streaming => "healthy",
        ConnectionState::Error => "degraded",
        _ => "idle",
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: obd_protocol::unix_time_ms() / 1000,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        adapter: AdapterHealth {
            connection_state: snapshot.connection_state,
            device_name: snapshot.device_name.clone(),
            last_error: snapshot.last_error.clone(),
            last_update_ms: snapshot.last_update_ms,
            tracked_pids: snapshot.latest_values.len(),
        },
        pending_alerts: state.alerts.lock().pending().len(),
    })
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Initialize logging; `RUST_LOG` takes precedence over `level`
pub fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow::anyhow!("Failed to set tracing subscriber: {err}"))
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Pick the adapter to connect to from a scan
///
/// An explicit id must be present in the results. Otherwise the strongest
/// signal wins, with unknown strength ranked last.
pub fn choose_adapter<'a>(
    devices: &'a [DeviceDescriptor],
    device_id: Option<&str>,
) -> Option<&'a DeviceDescriptor> {
    match device_id {
        Some(id) => devices.iter().find(|d| d.id == id),
        None => devices
            .iter()
            .max_by_key(|d| d.signal_strength.unwrap_or(i16::MIN)),
    }
}

/// Scan once and connect to the chosen adapter
///
/// Failures land in the store as the user-visible error; connection
/// attempts are not retried.
pub async fn connect_adapter<T: ObdTransport>(
    transport: Arc<T>,
    store: Arc<TelemetryStore>,
    device_id: Option<String>,
) {
    let devices = match transport.scan(None).await {
        Ok(devices) => devices,
        Err(err) => {
            error!("Adapter scan failed: {}", err);
            store.record_failure(format!("Scan failed: {err}"));
            counter!("obd_connect_attempts_total", "outcome" => "scan_failed").increment(1);
            return;
        }
    };
    info!("Scan found {} adapter(s)", devices.len());

    let Some(device) = choose_adapter(&devices, device_id.as_deref()) else {
        let message = match &device_id {
            Some(id) => format!("Adapter {id} not found"),
            None => "No OBD adapter found".to_string(),
        };
        warn!("{}", message);
        store.record_failure(message);
        counter!("obd_connect_attempts_total", "outcome" => "not_found").increment(1);
        return;
    };

    info!("Connecting to {} ({})", device.display_name, device.id);
    store.set_device_name(Some(device.display_name.clone()));
    let outcome = match transport.connect(&device.id).await {
        Ok(()) => "connected",
        Err(err) => {
            error!("Connection to {} failed: {}", device.id, err);
            store.record_failure(format!("Connection failed: {err}"));
            "rejected"
        }
    };
    counter!("obd_connect_attempts_total", "outcome" => outcome).increment(1);
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("Could not listen for ctrl-c: {}", err);
                return shutdown.cancelled().await;
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
}

/// Run the service until ctrl-c
pub async fn run<R: BleRadio>(
    settings: Settings,
    radio: R,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let transport = Arc::new(BleTransport::new(radio, settings.transport.clone()));
    let store = Arc::new(TelemetryStore::new(settings.store.clone()));
    let alerts = Arc::new(Mutex::new(AlertManager::new(settings.alerts.clone())?));
    let session = Arc::new(SessionController::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        settings.session.clone(),
    ));

    let shutdown = CancellationToken::new();
    let session_task = tokio::spawn(Arc::clone(&session).run(shutdown.clone()));
    let monitor_task = tokio::spawn(watch_telemetry(
        Arc::clone(&alerts),
        store.subscribe(),
        shutdown.clone(),
    ));
    let connect_task = tokio::spawn(connect_adapter(
        Arc::clone(&transport),
        Arc::clone(&store),
        settings.device_id.clone(),
    ));

    let app = create_router(Arc::new(AppState::new(Arc::clone(&store), alerts, metrics)));
    let listener = tokio::net::TcpListener::bind(&settings.http_addr).await?;
    info!("Starting API server on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    shutdown.cancel();
    connect_task.abort();
    transport.disconnect().await;
    let _ = session_task.await;
    let _ = monitor_task.await;
    info!("Service stopped");

    Ok(served?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ble_transport::mock::MockRadio;
    use ble_transport::{Advertisement, ProtocolKind, TransportConfig};
    use tower::ServiceExt;

    pub(crate) fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(TelemetryStore::default()),
            Arc::new(Mutex::new(AlertManager::default())),
            None,
        ))
    }

    fn descriptor(id: &str, rssi: Option<i16>) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            display_name: format!("OBDII {id}"),
            protocol: ProtocolKind::Ble,
            signal_strength: rssi,
        }
    }

    fn advertisement(id: &str, name: &str, rssi: i16) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            local_name: Some(name.to_string()),
            rssi: Some(rssi),
            protocol: ProtocolKind::Ble,
        }
    }

    #[test]
    fn test_choose_adapter() {
        let devices = vec![
            descriptor("a", Some(-80)),
            descriptor("b", None),
            descriptor("c", Some(-55)),
        ];
        assert_eq!(choose_adapter(&devices, None).unwrap().id, "c");
        assert_eq!(choose_adapter(&devices, Some("b")).unwrap().id, "b");
        assert!(choose_adapter(&devices, Some("z")).is_none());
        assert!(choose_adapter(&[], None).is_none());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["adapter"]["connection_state"], "DISCONNECTED");
        assert_eq!(json["pending_alerts"], 0);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_adapter_picks_strongest() {
        let radio = MockRadio::new().with_advertisements(vec![
            advertisement("weak", "OBDII", -90),
            advertisement("strong", "Veepeak OBDCheck", -40),
            advertisement("phone", "Pixel 8", -30),
        ]);
        let transport = Arc::new(BleTransport::new(radio, TransportConfig::default()));
        let store = Arc::new(TelemetryStore::default());

        connect_adapter(Arc::clone(&transport), Arc::clone(&store), None).await;

        assert_eq!(transport.connected_device().as_deref(), Some("strong"));
        assert_eq!(store.snapshot().device_name.as_deref(), Some("Veepeak OBDCheck"));
        transport.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_adapter_reports_missing_device() {
        let radio = MockRadio::new().with_advertisements(vec![advertisement("a", "OBDII", -60)]);
        let transport = Arc::new(BleTransport::new(radio, TransportConfig::default()));
        let store = Arc::new(TelemetryStore::default());

        connect_adapter(
            Arc::clone(&transport),
            Arc::clone(&store),
            Some("missing".to_string()),
        )
        .await;

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(
            store.snapshot().last_error.as_deref(),
            Some("Adapter missing not found")
        );
    }
}
