//! Encrypted source object retrieval
//!
//! The pipeline reads whole encrypted containers into memory; the store
//! trait hides where they come from. The local backend maps bucket/key to
//! a directory tree (development and tests), the HTTP backend fetches from
//! an object gateway.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::models::SourceLocator;
use undrm_common::{Error, Result};

/// Fetches encrypted source objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A missing object yields [`Error::SourceNotFound`]; an unreachable
    /// backend yields [`Error::DependencyUnavailable`].
    async fn fetch(&self, source: &SourceLocator) -> Result<Vec<u8>>;
}

// ============================================================================
// Local filesystem backend
// ============================================================================

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn fetch(&self, source: &SourceLocator) -> Result<Vec<u8>> {
        let path = self.root.join(&source.bucket).join(&source.key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(
                    bucket = %source.bucket,
                    key = %source.key,
                    size = bytes.len(),
                    "Source object read"
                );
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::SourceNotFound(
                format!("{}/{}", source.bucket, source.key),
            )),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

// ============================================================================
// HTTP gateway backend
// ============================================================================

pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, source: &SourceLocator) -> Result<Vec<u8>> {
        let url = format!("{}/{}/{}", self.base_url, source.bucket, source.key);
        let response = self.client.get(&url).send().await.map_err(|e| {
            Error::DependencyUnavailable(format!("Object store unreachable: {}", e))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SourceNotFound(format!(
                "{}/{}",
                source.bucket, source.key
            )));
        }
        if !status.is_success() {
            return Err(Error::DependencyUnavailable(format!(
                "Object store returned {}",
                status
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            Error::DependencyUnavailable(format!("Object store read failed: {}", e))
        })?;

        tracing::debug!(
            bucket = %source.bucket,
            key = %source.key,
            size = bytes.len(),
            "Source object fetched"
        );
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_reads_bucket_key_layout() {
        let dir = tempfile::tempdir().unwrap();
        let bucket_dir = dir.path().join("books");
        std::fs::create_dir_all(&bucket_dir).unwrap();
        std::fs::write(bucket_dir.join("100123.epub"), b"encrypted bytes").unwrap();

        let store = LocalObjectStore::new(dir.path());
        let source = SourceLocator {
            bucket: "books".to_string(),
            key: "100123.epub".to_string(),
        };
        let bytes = store.fetch(&source).await.unwrap();
        assert_eq!(bytes, b"encrypted bytes");
    }

    #[tokio::test]
    async fn local_store_missing_object_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let source = SourceLocator {
            bucket: "books".to_string(),
            key: "missing.epub".to_string(),
        };
        let err = store.fetch(&source).await.unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }
}
