//! Database initialization
//!
//! SQLite, created on first start. Two tables: provisioned license keys
//! and the audit trail.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

use undrm_common::{Error, Result};

/// Open (creating if necessary) the service database
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("Cannot create database directory: {}", e)))?;
        }
    }

    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| Error::Internal(format!("Database connection failed: {}", e)))?;

    init_tables(&pool).await?;

    tracing::info!(path = %db_path.display(), "Database initialized");
    Ok(pool)
}

/// Create the schema if it does not exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS license_keys (
            item_id TEXT PRIMARY KEY,
            gkey TEXT NOT NULL,
            grant_id TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Internal(format!("Schema creation failed: {}", e)))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS undrm_audit (
            event_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            s3_bucket TEXT NOT NULL,
            s3_key TEXT NOT NULL,
            grant_id TEXT NOT NULL,
            action TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            failure_reason TEXT,
            drm_type TEXT NOT NULL,
            undrm_start_time TEXT NOT NULL,
            undrm_end_time TEXT,
            event_time TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Internal(format!("Schema creation failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tables_create_idempotently() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_tables(&pool).await.unwrap();
        init_tables(&pool).await.unwrap();

        sqlx::query("INSERT INTO license_keys (item_id, gkey) VALUES ('1', 'abc')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
