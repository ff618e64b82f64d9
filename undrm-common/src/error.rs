//! Common error types for the UNDRM pipeline
//!
//! One variant per pipeline failure class. The HTTP layer maps these onto
//! status codes; the orchestrator records their descriptions in the audit
//! trail. No variant is ever swallowed inside the pipeline.

use thiserror::Error;

/// Common result type for UNDRM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// No license key mapping exists for the requested item (404-class)
    #[error("License key not found: {0}")]
    KeyNotFound(String),

    /// A backing service (key store, inference endpoint) cannot be
    /// reached or timed out (503-class)
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Integrity or format mismatch while decrypting the container (500-class)
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The decrypted container's structure is invalid or incomplete (422-class)
    #[error("Container structure invalid: {0}")]
    Structure(String),

    /// The inference service produced unusable output (500-class)
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Source object absent from the object store (404-class)
    #[error("Source object not found: {0}")]
    SourceNotFound(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error with no more specific classification
    #[error("Internal error: {0}")]
    Internal(String),
}
