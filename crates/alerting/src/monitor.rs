//! Background rule evaluation over store snapshots

use parking_lot::Mutex;
use std::sync::Arc;
use telemetry_store::TelemetrySnapshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::manager::AlertManager;

/// Evaluate rules on every published snapshot until shutdown or store drop
pub async fn watch_telemetry(
    manager: Arc<Mutex<AlertManager>>,
    mut snapshots: watch::Receiver<Arc<TelemetrySnapshot>>,
    shutdown: CancellationToken,
) {
    info!("Anomaly monitor started");
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        manager.lock().evaluate(&snapshot);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("Anomaly monitor stopped");
}
