//! Audit sinks
//!
//! One audit record per pipeline run, created in `Processing` state before
//! any key material is touched and finalized exactly once. Both sinks
//! enforce the terminal-state invariant: an update against a record that
//! already reached `Success` or `Failure` is refused and logged, never
//! applied.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use undrm_common::audit::{AuditCompletion, AuditRecord};
use undrm_common::{Error, Result};

/// Durable destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist a new record. Creating the same `event_id` twice is a no-op.
    async fn create(&self, record: &AuditRecord) -> Result<()>;

    /// Apply the terminal update for `event_id`. Refused (with a warning,
    /// not an error) when the record is already terminal.
    async fn finish(&self, event_id: Uuid, completion: &AuditCompletion) -> Result<()>;
}

// ============================================================================
// File sink
// ============================================================================

/// One pretty-printed JSON document per event under a log directory
pub struct FileAuditSink {
    dir: PathBuf,
}

impl FileAuditSink {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Internal(format!("Cannot create audit directory: {}", e)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, event_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", event_id))
    }

    async fn read_record(&self, event_id: Uuid) -> Result<AuditRecord> {
        let path = self.record_path(event_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Internal(format!("Audit record {} unreadable: {}", event_id, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Internal(format!("Audit record {} corrupt: {}", event_id, e)))
    }

    async fn write_record(&self, record: &AuditRecord) -> Result<()> {
        let path = self.record_path(record.event_id);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::Internal(format!("Audit serialization failed: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::Internal(format!("Audit write failed: {}", e)))
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn create(&self, record: &AuditRecord) -> Result<()> {
        let path = self.record_path(record.event_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        self.write_record(record).await
    }

    async fn finish(&self, event_id: Uuid, completion: &AuditCompletion) -> Result<()> {
        let mut record = self.read_record(event_id).await?;

        if record.status.is_terminal() {
            tracing::warn!(
                %event_id,
                current = record.status.as_str(),
                attempted = completion.status.as_str(),
                "Refusing terminal transition on already-terminal audit record"
            );
            return Ok(());
        }

        record.status = completion.status;
        record.undrm_end_time = Some(completion.end_time);
        record.failure_reason = completion.failure_reason.clone();
        if let Some(grant_id) = &completion.grant_id {
            record.grant_id = grant_id.clone();
        }
        self.write_record(&record).await
    }
}

// ============================================================================
// Database sink
// ============================================================================

/// Audit table in the service database
pub struct DatabaseAuditSink {
    pool: sqlx::SqlitePool,
}

impl DatabaseAuditSink {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for DatabaseAuditSink {
    async fn create(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO undrm_audit
             (event_id, tenant_id, item_id, s3_bucket, s3_key, grant_id,
              action, reason, status, failure_reason, drm_type,
              undrm_start_time, undrm_end_time, event_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.event_id.to_string())
        .bind(&record.tenant_id)
        .bind(&record.item_id)
        .bind(&record.s3_bucket)
        .bind(&record.s3_key)
        .bind(&record.grant_id)
        .bind(&record.action)
        .bind(&record.reason)
        .bind(record.status.as_str())
        .bind(&record.failure_reason)
        .bind(&record.drm_type)
        .bind(record.undrm_start_time.to_rfc3339())
        .bind(record.undrm_end_time.map(|t| t.to_rfc3339()))
        .bind(record.event_time.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("Audit insert failed: {}", e)))?;
        Ok(())
    }

    async fn finish(&self, event_id: Uuid, completion: &AuditCompletion) -> Result<()> {
        // The status guard makes the terminal transition exactly-once even
        // under concurrent completion attempts
        let result = sqlx::query(
            "UPDATE undrm_audit
             SET status = ?,
                 undrm_end_time = ?,
                 failure_reason = ?,
                 grant_id = COALESCE(?, grant_id)
             WHERE event_id = ? AND status = 'PROCESSING'",
        )
        .bind(completion.status.as_str())
        .bind(completion.end_time.to_rfc3339())
        .bind(&completion.failure_reason)
        .bind(&completion.grant_id)
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("Audit update failed: {}", e)))?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                %event_id,
                attempted = completion.status.as_str(),
                "Audit record missing or already terminal, update refused"
            );
        }
        Ok(())
    }
}
