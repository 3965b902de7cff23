//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting connection status and cache accounting, plus
//! Prometheus metrics. The dashboard's backend-for-frontend and container
//! orchestrators both read it.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status with connection stats and cache metrics
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (ready iff the stream is connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::dispatch::StreamCache;
use crate::infrastructure::cache::CacheMetrics;
use crate::infrastructure::metrics::{get_metrics_handle, publish_cache_metrics};
use crate::infrastructure::socket::connection::{
    ConnectionManager, ConnectionState, ConnectionStats,
};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Streaming connection statistics.
    pub connection: ConnectionStats,
    /// Live subscription count.
    pub subscriptions: usize,
    /// Cache accounting snapshot.
    pub cache: CacheMetrics,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected, data flowing.
    Healthy,
    /// Connection being (re)established; cached values still served.
    Degraded,
    /// No connection and none pending.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connection: Arc<ConnectionManager>,
    cache: Arc<StreamCache>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, connection: Arc<ConnectionManager>, cache: Arc<StreamCache>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connection,
            cache,
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
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

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
    if state.connection.state() == ConnectionState::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    publish_cache_metrics(&state.cache.metrics());

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
    let connection = state.connection.stats();
    let status = determine_health_status(connection.state);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection,
        subscriptions: state.connection.subscription_count(),
        cache: state.cache.metrics(),
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Error => HealthStatus::Unhealthy,
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
    use crate::application::dispatch::MessageDispatcher;
    use crate::domain::subscription::SubscriptionRegistry;
    use crate::infrastructure::config::ConnectionSettings;

    fn test_state() -> HealthServerState {
        let cache = Arc::new(StreamCache::with_defaults());
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
        ));
        let connection = ConnectionManager::new(ConnectionSettings::default(), registry, dispatcher);
        HealthServerState::new("0.1.0-test".to_string(), connection, cache)
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
    fn status_follows_connection_state() {
        assert_eq!(
            determine_health_status(ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(ConnectionState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ConnectionState::Connecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ConnectionState::Disconnected),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            determine_health_status(ConnectionState::Error),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn response_reflects_disconnected_manager() {
        let state = test_state();
        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.version, "0.1.0-test");
        assert_eq!(response.subscriptions, 0);
        assert_eq!(response.cache.size, 0);

        // The whole response serializes for the dashboard.
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["connection"]["state"], "disconnected");
    }
}
