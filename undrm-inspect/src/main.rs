//! undrm-inspect - DRM removal and start-point analysis service
//!
//! Exposes `POST /v1/epub/inspect`: fetch an encrypted EPUB, decrypt and
//! analyze it in memory, and return where the narrative content starts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use undrm_common::config::{
    AuditBackend, LicenseBackend, ObjectStoreBackend, ServiceConfig,
};
use undrm_inspect::audit::{AuditSink, DatabaseAuditSink, FileAuditSink};
use undrm_inspect::pipeline::InspectPipeline;
use undrm_inspect::services::{
    DatabaseLicenseResolver, HttpObjectStore, InferenceClient, InferenceSettings,
    KeyServiceResolver, LicenseResolver, LocalObjectStore, ObjectStore,
};
use undrm_inspect::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting undrm-inspect service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("UNDRM_CONFIG").ok().map(PathBuf::from);
    let config = ServiceConfig::load(config_path.as_deref())?;

    let db_pool = undrm_inspect::db::init_database_pool(&config.database.path).await?;

    let object_store: Arc<dyn ObjectStore> = match config.object_store.backend {
        ObjectStoreBackend::Local => {
            let root = config
                .object_store
                .local_root
                .as_deref()
                .expect("validated at load time");
            info!(root = %root.display(), "Object store: local");
            Arc::new(LocalObjectStore::new(root))
        }
        ObjectStoreBackend::Http => {
            let url = config
                .object_store
                .base_url
                .as_deref()
                .expect("validated at load time");
            info!(url, "Object store: http");
            Arc::new(HttpObjectStore::new(url)?)
        }
    };

    let resolver: Arc<dyn LicenseResolver> = match config.license.backend {
        LicenseBackend::Database => {
            info!("License resolver: database");
            Arc::new(DatabaseLicenseResolver::new(db_pool.clone()))
        }
        LicenseBackend::KeyService => {
            let url = config
                .license
                .key_service_url
                .as_deref()
                .expect("validated at load time");
            info!(url, "License resolver: key service");
            Arc::new(KeyServiceResolver::new(url)?)
        }
    };

    let audit: Arc<dyn AuditSink> = match config.audit.sink {
        AuditBackend::File => {
            info!(dir = %config.audit.log_dir.display(), "Audit sink: file");
            Arc::new(FileAuditSink::new(&config.audit.log_dir)?)
        }
        AuditBackend::Database => {
            info!("Audit sink: database");
            Arc::new(DatabaseAuditSink::new(db_pool.clone()))
        }
    };

    let inference = Arc::new(InferenceClient::new(InferenceSettings {
        base_url: config.inference.base_url.clone(),
        model: config.inference.model.clone(),
        api_key: config.inference.api_key.clone(),
        timeout: Duration::from_secs(config.inference.timeout_secs),
    })?);
    info!(model = %config.inference.model, "Inference client ready");

    let pipeline = Arc::new(InspectPipeline::new(
        resolver,
        audit,
        inference,
        config.limits.max_decrypt_concurrency,
    ));

    let state = AppState::new(db_pool, object_store, pipeline);
    let app = undrm_inspect::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!("Listening on http://{}", config.server.bind_addr);
    info!("Health check: http://{}/health", config.server.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
