//! Audit record model for DRM removal events
//!
//! Every pipeline run produces exactly one audit record. The record is
//! created in `Processing` state before any key material is touched and
//! transitions exactly once to a terminal state. A record never leaves a
//! terminal state; sinks enforce this on update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed action tag recorded for every DRM removal event
pub const AUDIT_ACTION_UNDRM: &str = "UNDRM";

/// Fixed DRM algorithm tag for the current container format
pub const DRM_TYPE_V2: &str = "V2";

/// Lifecycle state of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    /// Record created, pipeline still running
    #[serde(rename = "PROCESSING")]
    Processing,
    /// Pipeline completed and returned a result
    #[serde(rename = "SUCCESS")]
    Success,
    /// Pipeline failed; `failure_reason` holds the triggering error
    #[serde(rename = "FAILURE")]
    Failure,
}

impl AuditStatus {
    /// Whether this status is terminal (no further transitions allowed)
    pub fn is_terminal(self) -> bool {
        matches!(self, AuditStatus::Success | AuditStatus::Failure)
    }

    /// Database/text representation, matching the serde rename
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Processing => "PROCESSING",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
        }
    }
}

/// One DRM removal event, keyed by `event_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub tenant_id: String,
    pub item_id: String,
    pub s3_bucket: String,
    pub s3_key: String,
    /// License grant identifier; "N/A" when the resolver backend does not
    /// track per-grant identifiers
    pub grant_id: String,
    /// Always [`AUDIT_ACTION_UNDRM`]
    pub action: String,
    /// Purpose string from the request (e.g. "find_start_point")
    pub reason: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub drm_type: String,
    pub undrm_start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undrm_end_time: Option<DateTime<Utc>>,
    pub event_time: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a new record in `Processing` state with the start time set now
    pub fn processing(
        event_id: Uuid,
        tenant_id: &str,
        item_id: &str,
        s3_bucket: &str,
        s3_key: &str,
        reason: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id,
            tenant_id: tenant_id.to_string(),
            item_id: item_id.to_string(),
            s3_bucket: s3_bucket.to_string(),
            s3_key: s3_key.to_string(),
            grant_id: "N/A".to_string(),
            action: AUDIT_ACTION_UNDRM.to_string(),
            reason: reason.to_string(),
            status: AuditStatus::Processing,
            failure_reason: None,
            drm_type: DRM_TYPE_V2.to_string(),
            undrm_start_time: now,
            undrm_end_time: None,
            event_time: now,
        }
    }
}

/// Terminal update applied to an audit record when the pipeline exits
#[derive(Debug, Clone)]
pub struct AuditCompletion {
    /// Must be `Success` or `Failure`
    pub status: AuditStatus,
    pub end_time: DateTime<Utc>,
    pub failure_reason: Option<String>,
    /// Backfilled grant identifier once the resolver has reported one
    pub grant_id: Option<String>,
}

impl AuditCompletion {
    pub fn success(grant_id: Option<String>) -> Self {
        Self {
            status: AuditStatus::Success,
            end_time: Utc::now(),
            failure_reason: None,
            grant_id,
        }
    }

    pub fn failure(reason: String, grant_id: Option<String>) -> Self {
        Self {
            status: AuditStatus::Failure,
            end_time: Utc::now(),
            failure_reason: Some(reason),
            grant_id,
        }
    }
}
