//! undrm-inspect: in-memory DRM removal and start-point analysis for
//! encrypted EPUB containers
//!
//! One HTTP endpoint drives the whole pipeline: fetch the encrypted
//! container, resolve its license key, decrypt and parse it entirely in
//! memory, then infer where the narrative content starts. Plaintext and
//! key material never touch durable storage; the only durable artifacts
//! are the audit trail and the response.

pub mod api;
pub mod audit;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::pipeline::InspectPipeline;
use crate::services::ObjectStore;

/// Request counters surfaced by the health endpoint
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Inspect requests accepted (past input validation)
    pub requests_total: AtomicU64,
    /// Inspect requests that failed after acceptance
    pub failures_total: AtomicU64,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Encrypted source object retrieval
    pub object_store: Arc<dyn ObjectStore>,
    /// The inspect pipeline
    pub pipeline: Arc<InspectPipeline>,
    /// Service startup time for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for health diagnostics; covers source fetch failures as
    /// well as pipeline failures
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Inspect request counters for health diagnostics
    pub stats: Arc<ServiceStats>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        object_store: Arc<dyn ObjectStore>,
        pipeline: Arc<InspectPipeline>,
    ) -> Self {
        Self {
            db,
            object_store,
            pipeline,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            stats: Arc::new(ServiceStats::default()),
        }
    }
}

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::inspect_routes())
        .with_state(state)
}
