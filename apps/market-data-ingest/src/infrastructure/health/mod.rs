//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AdapterStatus, StatusSnapshot};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::queue::OutputQueue;

/// Queue fill ratio at which the service reports itself degraded.
const QUEUE_PRESSURE_THRESHOLD: f64 = 0.9;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection and registry state.
    pub feed: StatusSnapshot,
    /// Output queue occupancy.
    pub queue: QueueStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and the queue has headroom.
    Healthy,
    /// Connected but the queue is close to full.
    Degraded,
    /// Not connected to the feed.
    Unhealthy,
}

/// Output queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Events waiting.
    pub depth: usize,
    /// Capacity.
    pub capacity: usize,
    /// `depth / capacity`.
    pub utilization: f64,
}

impl QueueStatus {
    fn of(queue: &OutputQueue) -> Self {
        let depth = queue.len();
        let capacity = queue.capacity();
        #[allow(clippy::cast_precision_loss)]
        let utilization = depth as f64 / capacity as f64;
        Self {
            depth,
            capacity,
            utilization,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status: AdapterStatus,
    queue: Arc<OutputQueue>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, status: AdapterStatus, queue: Arc<OutputQueue>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            queue,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.status.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.status.snapshot();
    let queue = QueueStatus::of(&state.queue);

    HealthResponse {
        status: determine_health_status(&feed, &queue),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        queue,
    }
}

fn determine_health_status(feed: &StatusSnapshot, queue: &QueueStatus) -> HealthStatus {
    if !feed.connected {
        HealthStatus::Unhealthy
    } else if queue.utilization >= QUEUE_PRESSURE_THRESHOLD {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::QuoteSnapshot;

    fn snapshot(connected: bool) -> StatusSnapshot {
        StatusSnapshot {
            connected,
            active_subscriptions: 4,
            registered_contracts: 2,
        }
    }

    fn queue(depth: usize, capacity: usize) -> QueueStatus {
        #[allow(clippy::cast_precision_loss)]
        let utilization = depth as f64 / capacity as f64;
        QueueStatus {
            depth,
            capacity,
            utilization,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_connected_with_headroom() {
        let status = determine_health_status(&snapshot(true), &queue(10, 100));
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_queue_pressure() {
        let status = determine_health_status(&snapshot(true), &queue(95, 100));
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn determine_status_disconnected() {
        let status = determine_health_status(&snapshot(false), &queue(0, 100));
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn response_reports_queue_occupancy() {
        let queue = OutputQueue::shared(4);
        queue
            .put(QuoteSnapshot::from_raw("AAPL".into(), 1.0, 2.0, f64::NAN, f64::NAN, None).into())
            .await
            .unwrap();
        let state = HealthServerState::new("1.0.0".to_string(), AdapterStatus::default(), queue);

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.queue.depth, 1);
        assert_eq!(response.queue.capacity, 4);
        assert!((response.queue.utilization - 0.25).abs() < f64::EPSILON);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["feed"]["connected"], false);
        assert_eq!(json["queue"]["capacity"], 4);
    }
}
