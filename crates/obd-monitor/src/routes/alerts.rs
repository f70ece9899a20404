//! Alert Routes

use alerting::{Anomaly, Severity};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;

/// Query parameters for alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Filter by severity
    pub severity: Option<Severity>,
    /// Filter by acknowledged status
    pub acknowledged: Option<bool>,
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for alerts endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    /// Newest first
    pub data: Vec<Anomaly>,
    pub count: usize,
    pub unacknowledged_count: usize,
}

/// Get raised anomalies
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertResponse> {
    let manager = state.alerts.lock();

    let data: Vec<Anomaly> = manager
        .anomalies()
        .iter()
        .rev()
        .filter(|a| params.severity.map_or(true, |s| a.severity == s))
        .filter(|a| params.acknowledged.map_or(true, |ack| a.acknowledged == ack))
        .take(params.limit)
        .cloned()
        .collect();
    let unacknowledged_count = manager.pending().len();

    Json(AlertResponse {
        count: data.len(),
        unacknowledged_count,
        data,
    })
}

/// Acknowledge one anomaly
pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> StatusCode {
    if state.alerts.lock().acknowledge(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use crate::create_router;
    use crate::tests::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use obd_protocol::{Pid, TelemetrySample};
    use tower::ServiceExt;

    fn raise_overheating(state: &crate::AppState, at_ms: u64) {
        state
            .store
            .publish_samples(vec![TelemetrySample::new(Pid::CoolantTemp, 118.0, at_ms)]);
        state.alerts.lock().evaluate(&state.store.snapshot());
    }

    async fn list(app: axum::Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_alerts_listed_newest_first() {
        let state = test_state();
        raise_overheating(&state, 1_000);
        raise_overheating(&state, 10_000);

        let json = list(create_router(state), "/api/v1/alerts").await;
        assert_eq!(json["count"], 2);
        assert_eq!(json["unacknowledged_count"], 2);
        assert_eq!(json["data"][0]["id"], 2);
        assert_eq!(json["data"][0]["severity"], "critical");
        assert_eq!(json["data"][0]["message"], "Engine overheating detected");
    }

    #[tokio::test]
    async fn test_acknowledge_then_filter() {
        let state = test_state();
        raise_overheating(&state, 1_000);
        raise_overheating(&state, 10_000);
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/alerts/1/ack")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let json = list(app.clone(), "/api/v1/alerts?acknowledged=false").await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["data"][0]["id"], 2);
        assert_eq!(json["unacknowledged_count"], 1);

        let json = list(app.clone(), "/api/v1/alerts?severity=warning").await;
        assert_eq!(json["count"], 0);

        let response = app
            .oneshot(
                Request::post("/api/v1/alerts/99/ack")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
