//! # Health Check Endpoints
//!
//! - **Liveness** (`/health/live`): the process is running.
//! - **Readiness** (`/health/ready`): bootstrap has finished.
//! - **Summary** (`/health`): readiness plus peer and store sizes.
//! - **Metrics** (`/metrics`): Prometheus text format.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::{NodeError, Result};
use crate::node::Node;

/// Health status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Healthy.
    Up,
    /// Not (yet) healthy.
    Down,
}

/// Liveness probe response.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Readiness probe response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Bootstrap outcome, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<String>,
}

/// Peer counts.
#[derive(Debug, Clone, Serialize)]
pub struct PeerCounts {
    /// Peers in the registry.
    pub known: usize,
    /// Peers currently alive.
    pub alive: usize,
}

/// Overall health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Version info.
    pub version: String,
    /// This node's identity.
    pub identity: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Bootstrap outcome, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<String>,
    /// Peer counts.
    pub peers: PeerCounts,
    /// Keys in the store, tombstones included.
    pub store_keys: usize,
}

/// Create health and metrics routes.
pub fn health_routes(node: Arc<Node>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Binds the health listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { addr, source })
}

/// Serves health routes on `listener` until the task is aborted.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "Health server started");
    axum::serve(listener, health_routes(node)).await?;
    Ok(())
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn readiness(node: &Node) -> HealthStatus {
    if node.is_ready() {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    }
}

/// Overall health handler.
async fn health_handler(State(node): State<Arc<Node>>) -> Response {
    let status = readiness(&node);
    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        identity: node.identity().to_string(),
        uptime_seconds: node.uptime().as_secs(),
        bootstrap: node.bootstrap_outcome().map(|o| o.to_string()),
        peers: PeerCounts {
            known: node.registry().len(),
            alive: node.registry().alive_count(),
        },
        store_keys: node.consensus().len().unwrap_or(0),
    };

    (status_code(status), Json(response)).into_response()
}

/// Liveness probe handler.
async fn liveness_handler(State(node): State<Arc<Node>>) -> Response {
    let response = LivenessResponse {
        status: HealthStatus::Up,
        uptime_seconds: node.uptime().as_secs(),
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Readiness probe handler.
async fn readiness_handler(State(node): State<Arc<Node>>) -> Response {
    let status = readiness(&node);
    let response = ReadinessResponse {
        status,
        bootstrap: node.bootstrap_outcome().map(|o| o.as_str().to_string()),
    };

    (status_code(status), Json(response)).into_response()
}

/// Prometheus scrape handler.
async fn metrics_handler(State(node): State<Arc<Node>>) -> Response {
    match node.encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
