//! Scan, connect, initialize and stream against the scripted radio

use ble_transport::mock::MockRadio;
use ble_transport::{Advertisement, BleTransport, ObdTransport, ProtocolKind, TransportConfig};
use obd_protocol::{ConnectionState, Pid};
use obd_session::{SessionConfig, SessionController};
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::TelemetryStore;
use tokio_util::sync::CancellationToken;

fn adapter_radio() -> MockRadio {
    MockRadio::new()
        .with_chunk_size(5)
        .with_advertisements(vec![Advertisement {
            id: "00:1D:A5:68:98:8B".to_string(),
            local_name: Some("OBDII".to_string()),
            rssi: Some(-58),
            protocol: ProtocolKind::Ble,
        }])
}

async fn wait_for(
    store: &TelemetryStore,
    predicate: impl Fn(&telemetry_store::TelemetrySnapshot) -> bool,
) -> Arc<telemetry_store::TelemetrySnapshot> {
    let mut rx = store.subscribe();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        if predicate(&snapshot) {
            return snapshot;
        }
        rx.changed().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_initializes_and_streams_one_batch_per_sweep() {
    let radio = adapter_radio();
    let transport = Arc::new(BleTransport::new(radio.clone(), TransportConfig::default()));
    let store = Arc::new(TelemetryStore::default());
    let session = Arc::new(SessionController::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        SessionConfig {
            cycle_delay_ms: 1_000,
            ..Default::default()
        },
    ));

    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(Arc::clone(&session).run(shutdown.clone()));
    let mut states = transport.subscribe();

    let devices = transport.scan(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(devices.len(), 1);
    transport.connect(&devices[0].id).await.unwrap();

    let snapshot = wait_for(&store, |s| !s.latest_values.is_empty()).await;
    assert_eq!(snapshot.connection_state, ConnectionState::Streaming);
    assert_eq!(snapshot.latest_values.len(), 7);
    assert_eq!(snapshot.value(Pid::Rpm), Some(1000.0));
    assert_eq!(snapshot.value(Pid::Speed), Some(50.0));
    assert_eq!(snapshot.value(Pid::CoolantTemp), Some(50.0));
    assert_eq!(snapshot.value(Pid::Maf), Some(5.0));
    assert_eq!(snapshot.value(Pid::ControlModuleVoltage), Some(14.0));
    for history in snapshot.history.values() {
        assert_eq!(history.len(), 1);
    }
    assert_eq!(session.adapter_version().as_deref(), Some("ELM327 v1.5"));

    let writes = radio.last_link().unwrap().writes();
    assert_eq!(
        &writes[..6],
        &["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"]
    );
    assert_eq!(
        &writes[6..13],
        &["010C", "010D", "0105", "0104", "010F", "0110", "0142"]
    );

    assert_eq!(
        states.drain(),
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Scanning,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Initializing,
            ConnectionState::Ready,
            ConnectionState::Streaming,
        ]
    );

    transport.disconnect().await;
    let snapshot = wait_for(&store, |s| {
        s.connection_state == ConnectionState::Disconnected
    })
    .await;
    assert_eq!(snapshot.latest_values.len(), 7);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!session.is_polling());
    assert_eq!(radio.last_link().unwrap().writes().len(), writes.len());

    shutdown.cancel();
    watcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_init_failure_reports_connection_failed() {
    let radio = adapter_radio().with_responder(|command| match command {
        "ATSP0" => Some("ERROR".to_string()),
        other => ble_transport::mock::elm327_reply(other),
    });
    let transport = Arc::new(BleTransport::new(radio, TransportConfig::default()));
    let store = Arc::new(TelemetryStore::default());
    let session = Arc::new(SessionController::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        SessionConfig::default(),
    ));

    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(Arc::clone(&session).run(shutdown.clone()));

    transport.connect("00:1D:A5:68:98:8B").await.unwrap();
    let snapshot = wait_for(&store, |s| s.last_error.is_some()).await;
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|m| m.contains("ATSP0")));

    let snapshot = wait_for(&store, |s| {
        s.connection_state == ConnectionState::Disconnected
    })
    .await;
    assert!(snapshot.latest_values.is_empty());
    assert!(!session.is_polling());
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    shutdown.cancel();
    watcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_halts_polling() {
    let radio = adapter_radio();
    let transport = Arc::new(BleTransport::new(radio.clone(), TransportConfig::default()));
    let store = Arc::new(TelemetryStore::default());
    let session = Arc::new(SessionController::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        SessionConfig::default(),
    ));

    let shutdown = CancellationToken::new();
    let watcher = tokio::spawn(Arc::clone(&session).run(shutdown.clone()));

    transport.connect("00:1D:A5:68:98:8B").await.unwrap();
    wait_for(&store, |s| !s.latest_values.is_empty()).await;

    radio.last_link().unwrap().sever();
    wait_for(&store, |s| {
        s.connection_state == ConnectionState::Disconnected
    })
    .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!session.is_polling());
    assert_eq!(
        transport.send_command("010C").await,
        Err(ble_transport::TransportError::NotConnected)
    );

    shutdown.cancel();
    watcher.await.unwrap();
}
