//! Configuration loading for the UNDRM service
//!
//! Two-tier resolution with TOML file → environment variable priority:
//! the optional TOML file supplies the base configuration and `UNDRM_*`
//! environment variables override individual values. Backend selection
//! (license resolver, audit sink, object store) is decided here, once,
//! at process wiring time.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// License resolver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseBackend {
    /// Look up key material in the service database
    Database,
    /// Resolve key material through a managed key service over HTTP
    KeyService,
}

/// Audit sink backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// One JSON document per event under a local directory
    File,
    /// Audit table in the service database
    Database,
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreBackend {
    /// Bucket/key resolved under a local directory root (dev and test)
    Local,
    /// Bucket/key fetched from an HTTP gateway
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP front door binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5810".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("undrm.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_object_store_backend")]
    pub backend: ObjectStoreBackend,
    /// Root directory for the `local` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,
    /// Base URL for the `http` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_object_store_backend() -> ObjectStoreBackend {
    ObjectStoreBackend::Local
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_object_store_backend(),
            local_root: Some(PathBuf::from("objects")),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default = "default_license_backend")]
    pub backend: LicenseBackend,
    /// Base URL for the `key_service` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_service_url: Option<String>,
}

fn default_license_backend() -> LicenseBackend {
    LicenseBackend::Database
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            backend: default_license_backend(),
            key_service_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_backend")]
    pub sink: AuditBackend,
    /// Directory for the `file` sink
    #[serde(default = "default_audit_dir")]
    pub log_dir: PathBuf,
}

fn default_audit_backend() -> AuditBackend {
    AuditBackend::File
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: default_audit_backend(),
            log_dir: default_audit_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the chat-completions endpoint
    #[serde(default = "default_inference_url")]
    pub base_url: String,
    #[serde(default = "default_inference_model")]
    pub model: String,
    /// API key; the `UNDRM_INFERENCE_API_KEY` environment variable takes
    /// priority so keys stay out of config files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_inference_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_inference_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    60
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_url(),
            model: default_inference_model(),
            api_key: None,
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Concurrent decrypt/parse operations on the blocking pool
    #[serde(default = "default_max_decrypt_concurrency")]
    pub max_decrypt_concurrency: usize,
}

fn default_max_decrypt_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cores * 2).max(5)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_decrypt_concurrency: default_max_decrypt_concurrency(),
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ServiceConfig {
    /// Load configuration from an optional TOML file, then apply
    /// environment overrides and validate backend selections.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("Read config failed: {}", e)))?;
                let parsed: ServiceConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Parse config failed: {}", e)))?;
                info!("Configuration loaded from {}", p.display());
                parsed
            }
            Some(p) => {
                warn!(
                    "Config file {} not found, using defaults with environment overrides",
                    p.display()
                );
                ServiceConfig::default()
            }
            None => ServiceConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("UNDRM_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("UNDRM_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("UNDRM_OBJECT_STORE_ROOT") {
            self.object_store.backend = ObjectStoreBackend::Local;
            self.object_store.local_root = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("UNDRM_OBJECT_STORE_URL") {
            self.object_store.backend = ObjectStoreBackend::Http;
            self.object_store.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("UNDRM_KEY_SERVICE_URL") {
            self.license.backend = LicenseBackend::KeyService;
            self.license.key_service_url = Some(v);
        }
        if let Ok(v) = std::env::var("UNDRM_AUDIT_DIR") {
            self.audit.sink = AuditBackend::File;
            self.audit.log_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("UNDRM_INFERENCE_URL") {
            self.inference.base_url = v;
        }
        if let Ok(v) = std::env::var("UNDRM_INFERENCE_MODEL") {
            self.inference.model = v;
        }
        if let Ok(v) = std::env::var("UNDRM_INFERENCE_API_KEY") {
            self.inference.api_key = Some(v);
        }
    }

    fn validate(&self) -> Result<()> {
        match self.object_store.backend {
            ObjectStoreBackend::Local if self.object_store.local_root.is_none() => {
                return Err(Error::Config(
                    "object_store.local_root required for the local backend".to_string(),
                ));
            }
            ObjectStoreBackend::Http if self.object_store.base_url.is_none() => {
                return Err(Error::Config(
                    "object_store.base_url required for the http backend".to_string(),
                ));
            }
            _ => {}
        }

        if self.license.backend == LicenseBackend::KeyService
            && self.license.key_service_url.is_none()
        {
            return Err(Error::Config(
                "license.key_service_url required for the key_service backend".to_string(),
            ));
        }

        if self.limits.max_decrypt_concurrency == 0 {
            return Err(Error::Config(
                "limits.max_decrypt_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
