//! Error types for the triage and retrieval pipeline.
//!
//! Two enums cover the library surface:
//!
//! - [`ProviderError`]: failures from an external collaborator (generation,
//!   embedding, file store, vector index). The retry layer in
//!   [`crate::provider`] only retries [`ProviderError::Transient`].
//! - [`TriageError`]: everything the registry, caches, and orchestrator can
//!   surface, including wrapped provider errors.
//!
//! Configuration loading and the `triage` binary use `anyhow` instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for triage operations.
pub type Result<T> = std::result::Result<T, TriageError>;

/// Errors raised by external collaborators.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, timeout, rate limit, or 5xx. Safe to retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Non-retryable failure (4xx, rejected upload, failed handle).
    #[error("provider error: {0}")]
    Fatal(String),

    /// No provider is configured.
    #[error("provider is disabled")]
    Disabled,
}

impl ProviderError {
    /// Returns `true` if the call layer should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ProviderError::Transient(e.to_string())
        } else {
            ProviderError::Fatal(e.to_string())
        }
    }
}

/// Errors that can occur in the triage pipeline.
#[derive(Debug, Error)]
pub enum TriageError {
    /// The source key is not present in the registry snapshot.
    #[error("knowledge source not found: {0}")]
    SourceNotFound(String),

    /// The registered file for a source no longer exists.
    #[error("source file missing for '{key}': {}", path.display())]
    FileMissing { key: String, path: PathBuf },

    /// The source kind cannot be uploaded (repositories).
    #[error("source '{0}' is a repository and cannot be uploaded")]
    UnsupportedSource(String),

    /// External collaborator failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A provider response did not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TriageError {
    /// Returns `true` for errors the caller should treat as fatal
    /// configuration problems rather than per-source degradation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TriageError::SourceNotFound(_) | TriageError::Config(_)
        )
    }
}
