//! Health and diagnostics endpoint
//!
//! Reports liveness plus the service's own view of recent work: inspect
//! request counters and the last pipeline or source-fetch error. A service
//! that has recorded an error reports `degraded` until the next successful
//! run clears it.

use std::sync::atomic::Ordering;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when an error has been recorded
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Inspect requests accepted since startup
    pub requests_total: u64,
    /// Inspect requests that failed after acceptance
    pub failures_total: u64,
    /// Most recent pipeline or source-fetch error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let last_error = state.last_error.read().await.clone();

    let status = if last_error.is_some() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "undrm-inspect".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        requests_total: state.stats.requests_total.load(Ordering::Relaxed),
        failures_total: state.stats.failures_total.load(Ordering::Relaxed),
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
