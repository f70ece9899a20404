//! Telemetry Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use obd_protocol::{ConnectionState, Pid, TelemetrySample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::AppState;

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of samples to return
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// One tracked value with its display metadata
#[derive(Debug, Serialize)]
pub struct LiveValue {
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
}

/// Response for the live endpoint
#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub connection_state: ConnectionState,
    pub device_name: Option<String>,
    pub last_error: Option<String>,
    pub last_update_ms: Option<u64>,
    pub revision: u64,
    pub data: BTreeMap<Pid, LiveValue>,
}

/// Response for the history endpoint
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub pid: Pid,
    pub name: &'static str,
    /// Newest first
    pub data: Vec<TelemetrySample>,
    pub count: usize,
    pub limit: usize,
}

/// Latest value per PID plus link status
pub async fn get_live(State(state): State<Arc<AppState>>) -> Json<LiveResponse> {
    let snapshot = state.store.snapshot();

    let data = snapshot
        .latest_values
        .iter()
        .map(|(pid, value)| {
            let definition = pid.definition();
            (
                *pid,
                LiveValue {
                    name: definition.name,
                    value: *value,
                    unit: definition.unit,
                },
            )
        })
        .collect();

    Json(LiveResponse {
        connection_state: snapshot.connection_state,
        device_name: snapshot.device_name.clone(),
        last_error: snapshot.last_error.clone(),
        last_update_ms: snapshot.last_update_ms,
        revision: snapshot.revision,
        data,
    })
}

/// Recent samples for one PID, addressed by request code (`010C`)
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let pid = Pid::from_code(&code)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown PID {code}")))?;
    let limit = params.limit.min(state.store.config().history_capacity);
    let data = state.store.history(pid, limit);

    Ok(Json(HistoryResponse {
        pid,
        name: pid.definition().name,
        count: data.len(),
        limit,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use crate::tests::test_state;
    use crate::create_router;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use obd_protocol::{Pid, TelemetrySample};
    use tower::ServiceExt;

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_live_reports_latest_values() {
        let state = test_state();
        state.store.publish_samples(vec![
            TelemetrySample::new(Pid::Rpm, 1000.0, 1_000),
            TelemetrySample::new(Pid::Speed, 50.0, 1_000),
        ]);
        state
            .store
            .publish_samples(vec![TelemetrySample::new(Pid::Rpm, 1250.0, 1_100)]);

        let (status, json) = get_json(create_router(state), "/api/v1/telemetry/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["010C"]["value"], 1250.0);
        assert_eq!(json["data"]["010C"]["unit"], "rpm");
        assert_eq!(json["data"]["010D"]["value"], 50.0);
        assert_eq!(json["last_update_ms"], 1_100);
    }

    #[tokio::test]
    async fn test_history_newest_first_with_limit() {
        let state = test_state();
        for i in 0..5u64 {
            state
                .store
                .publish_samples(vec![TelemetrySample::new(Pid::Speed, i as f64, i * 100)]);
        }

        let (status, json) =
            get_json(create_router(state), "/api/v1/telemetry/history/010D?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);
        assert_eq!(json["data"][0]["value"], 4.0);
        assert_eq!(json["data"][1]["value"], 3.0);
    }

    #[tokio::test]
    async fn test_history_unknown_pid() {
        let (status, _) =
            get_json(create_router(test_state()), "/api/v1/telemetry/history/01FF").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
