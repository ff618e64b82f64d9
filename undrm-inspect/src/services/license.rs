//! License key resolution
//!
//! Two backends behind one trait: the service database (key material
//! provisioned alongside the catalog) and a managed key service reached
//! over HTTP. Both return [`KeyMaterial`] and never log the key itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::models::KeyMaterial;
use undrm_common::{Error, Result};

/// Resolves decryption key material for an item
#[async_trait]
pub trait LicenseResolver: Send + Sync {
    /// An item with no provisioned license yields [`Error::KeyNotFound`];
    /// a backend that cannot be reached yields
    /// [`Error::DependencyUnavailable`].
    async fn resolve(&self, tenant_id: &str, item_id: &str) -> Result<KeyMaterial>;
}

// ============================================================================
// Database backend
// ============================================================================

pub struct DatabaseLicenseResolver {
    pool: SqlitePool,
}

impl DatabaseLicenseResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LicenseResolver for DatabaseLicenseResolver {
    async fn resolve(&self, _tenant_id: &str, item_id: &str) -> Result<KeyMaterial> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT gkey, grant_id FROM license_keys WHERE item_id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::DependencyUnavailable(format!("License database query failed: {}", e))
                })?;

        match row {
            Some((encoded, grant_id)) => {
                tracing::debug!(item_id, "License key resolved from database");
                KeyMaterial::from_base64(&encoded, grant_id)
            }
            None => Err(Error::KeyNotFound(format!(
                "No license key for item {}",
                item_id
            ))),
        }
    }
}

// ============================================================================
// Key service backend
// ============================================================================

#[derive(Serialize)]
struct KeyServiceRequest<'a> {
    tenant_id: &'a str,
    item_id: &'a str,
}

#[derive(Deserialize)]
struct KeyServiceResponse {
    key: String,
    #[serde(default)]
    grant_id: Option<String>,
}

pub struct KeyServiceResolver {
    client: reqwest::Client,
    base_url: String,
}

impl KeyServiceResolver {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LicenseResolver for KeyServiceResolver {
    async fn resolve(&self, tenant_id: &str, item_id: &str) -> Result<KeyMaterial> {
        let url = format!("{}/v1/keys/resolve", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&KeyServiceRequest { tenant_id, item_id })
            .send()
            .await
            .map_err(|e| {
                Error::DependencyUnavailable(format!("Key service unreachable: {}", e))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::KeyNotFound(format!(
                "Key service has no key for item {}",
                item_id
            )));
        }
        if !status.is_success() {
            return Err(Error::DependencyUnavailable(format!(
                "Key service returned {}",
                status
            )));
        }

        let body: KeyServiceResponse = response.json().await.map_err(|e| {
            Error::DependencyUnavailable(format!("Key service response unreadable: {}", e))
        })?;

        tracing::debug!(item_id, "License key resolved from key service");
        KeyMaterial::from_base64(&body.key, body.grant_id)
    }
}
