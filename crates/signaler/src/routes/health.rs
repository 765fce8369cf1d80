//! Health check endpoints.

use std::collections::HashMap;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::relay::RelayStats;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    presence: bool,
    bus: bool,
}

/// Readiness check (are all dependencies healthy?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let presence = match state.directory.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Presence directory not ready");
            false
        }
    };
    let bus = match state.bus.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Bus not ready");
            false
        }
    };

    if presence && bus {
        Ok(Json(ReadyResponse {
            status: "ready",
            presence,
            bus,
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    node_id: String,
    uptime_secs: u64,
    /// Local connections per registry partition
    connections: HashMap<String, usize>,
    relay: RelayStats,
}

/// Metrics endpoint (for monitoring)
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        node_id: state.node_id.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections: state.registry.counts().await,
        relay: state.router.stats(),
    })
}
