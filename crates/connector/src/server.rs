use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::metrics::encode_metrics;
use crate::state::{ConnectionStatus, DashboardState};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub stream: String,
    pub connection: ConnectionStatus,
    pub buffered: usize,
}

/// Shared state for HTTP endpoints
#[derive(Clone)]
pub struct ServerState {
    pub stream_name: String,
    pub dashboard: watch::Receiver<DashboardState>,
}

impl ServerState {
    pub fn new(stream_name: impl Into<String>, dashboard: watch::Receiver<DashboardState>) -> Self {
        Self {
            stream_name: stream_name.into(),
            dashboard,
        }
    }

    fn health(&self, status: &str) -> HealthResponse {
        let dashboard = self.dashboard.borrow();
        HealthResponse {
            status: status.to_string(),
            stream: self.stream_name.clone(),
            connection: dashboard.status,
            buffered: dashboard.records.len(),
        }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.health("ok"))
}

/// Ready endpoint - returns 200 only while streaming
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let streaming = state.dashboard.borrow().status == ConnectionStatus::Streaming;
    if streaming {
        (StatusCode::OK, Json(state.health("ready")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(state.health("not_ready")))
    }
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Current records, status and last error for an external chart
async fn snapshot(State(state): State<ServerState>) -> Json<DashboardState> {
    Json(state.dashboard.borrow().clone())
}

/// Create the HTTP router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/snapshot", get(snapshot))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StreamMetrics;
    use crate::record::TelemetryRecord;
    use crate::state::StatePublisher;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    fn create_test_state(status: ConnectionStatus) -> (ServerState, StatePublisher) {
        let publisher = StatePublisher::new();
        publisher.set_status(status);
        (ServerState::new("test-press", publisher.subscribe()), publisher)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let (state, _publisher) = create_test_state(ConnectionStatus::Idle);
        let (status, body) = get_body(create_router(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"stream\":\"test-press\""));
        assert!(body.contains("\"connection\":\"idle\""));
    }

    #[tokio::test]
    async fn test_ready_when_streaming() {
        let (state, _publisher) = create_test_state(ConnectionStatus::Streaming);
        let (status, _) = get_body(create_router(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_when_not_streaming() {
        let (state, _publisher) = create_test_state(ConnectionStatus::Error);
        let (status, body) = get_body(create_router(state), "/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("not_ready"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        StreamMetrics::new("server-test").inc_message();
        let (state, _publisher) = create_test_state(ConnectionStatus::Streaming);
        let (status, body) = get_body(create_router(state), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("pressmon_messages_total"));
    }

    #[tokio::test]
    async fn test_snapshot_follows_publisher() {
        let (state, publisher) = create_test_state(ConnectionStatus::Streaming);
        publisher.publish_records(vec![TelemetryRecord {
            time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            power: 10.0,
            voltage_l1: 1.0,
            voltage_l2: 2.0,
            voltage_l3: 3.0,
            pressure: 5.0,
            force: 6.0,
            cycle_count: 7.0,
            punch_position: 8.0,
        }]);

        let (status, body) = get_body(create_router(state), "/snapshot").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "streaming");
        assert_eq!(json["records"][0]["voltageL2"], 2.0);
        assert_eq!(json["records"][0]["cycleCount"], 7.0);
        assert!(json["last_error"].is_null());
    }
}
