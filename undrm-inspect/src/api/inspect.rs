//! Inspect endpoint
//!
//! `POST /v1/epub/inspect` runs the full pipeline for one encrypted
//! container and returns the inferred start point. The only accepted
//! purpose is `find_start_point`; anything else is rejected before any
//! object or key material is fetched.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::error::{ApiError, ApiResult};
use crate::models::{RequestContext, SourceLocator};
use crate::AppState;

const PURPOSE_FIND_START_POINT: &str = "find_start_point";

#[derive(Debug, Deserialize)]
pub struct InspectRequest {
    pub s3_bucket: String,
    pub s3_key: String,
    /// Numeric catalog identifier, as a digit string
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub purpose: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default = "default_use_full_toc")]
    pub use_full_toc_analysis: bool,
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_use_full_toc() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct InspectResponse {
    pub source: SourceInfo,
    pub start: StartInfo,
    pub processing: ProcessingInfo,
}

#[derive(Debug, Serialize)]
pub struct SourceInfo {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct StartInfo {
    pub start_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessingInfo {
    pub duration_ms: u64,
}

/// POST /v1/epub/inspect
pub async fn inspect(
    State(state): State<AppState>,
    Json(request): Json<InspectRequest>,
) -> ApiResult<Json<InspectResponse>> {
    if request.purpose != PURPOSE_FIND_START_POINT {
        return Err(ApiError::BadRequest(format!(
            "Unsupported purpose '{}', expected '{}'",
            request.purpose, PURPOSE_FIND_START_POINT
        )));
    }
    if request.item_id.is_empty() || !request.item_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest(
            "itemId must be a non-empty digit string".to_string(),
        ));
    }

    let started = Instant::now();
    state.stats.requests_total.fetch_add(1, Ordering::Relaxed);
    let source = SourceLocator {
        bucket: request.s3_bucket.clone(),
        key: request.s3_key.clone(),
    };

    let encrypted = match state.object_store.fetch(&source).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                bucket = %source.bucket,
                key = %source.key,
                error = %e,
                "Source fetch failed"
            );
            *state.last_error.write().await = Some(e.to_string());
            state.stats.failures_total.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }
    };

    let ctx = RequestContext::new(
        &request.tenant_id,
        &request.item_id,
        source,
        &request.purpose,
        request.use_full_toc_analysis,
    );

    let result = match state.pipeline.run(&ctx, encrypted).await {
        Ok(result) => result,
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            state.stats.failures_total.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }
    };
    *state.last_error.write().await = None;

    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        event_id = %ctx.event_id,
        item_id = %ctx.item_id,
        duration_ms,
        "Inspect request complete"
    );

    Ok(Json(InspectResponse {
        source: SourceInfo {
            bucket: ctx.source.bucket.clone(),
            key: ctx.source.key.clone(),
        },
        start: StartInfo {
            start_file: result.start_file,
            anchor: result.anchor,
            confidence: result.confidence,
            rationale: result.rationale,
        },
        processing: ProcessingInfo { duration_ms },
    }))
}

/// Build inspect routes
pub fn inspect_routes() -> Router<AppState> {
    Router::new().route("/v1/epub/inspect", post(inspect))
}
