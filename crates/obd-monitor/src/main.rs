//! OBD Monitor - Main Entry Point

use metrics_exporter_prometheus::PrometheusHandle;
use obd_monitor::{init_logging, install_metrics, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_path = std::env::args().nth(1);
    let settings = Settings::load(settings_path.as_deref())?;
    init_logging(&settings.log_level, settings.log_format)?;

    info!("=== OBD Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    let metrics = install_metrics()?;
    start(settings, metrics).await
}

#[cfg(feature = "btleplug")]
async fn start(settings: Settings, metrics: PrometheusHandle) -> anyhow::Result<()> {
    let radio = ble_transport::BtleplugRadio::first_adapter().await?;
    obd_monitor::run(settings, radio, Some(metrics)).await
}

#[cfg(not(feature = "btleplug"))]
async fn start(_settings: Settings, _metrics: PrometheusHandle) -> anyhow::Result<()> {
    anyhow::bail!("No radio backend compiled in; rebuild with `--features btleplug`")
}
