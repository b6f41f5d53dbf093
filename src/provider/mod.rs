//! External collaborator abstractions and implementations.
//!
//! Defines the traits the pipeline consumes, and the concrete providers:
//! - **[`Generator`]**: text generation from a prompt plus [`GenerateOptions`].
//! - **[`Embedder`]**: text to embedding vector.
//! - **[`FileStore`]**: remote file objects (`upload` / `get`) with a
//!   `processing → active | failed` lifecycle.
//!
//! Implementations:
//! - **[`DisabledProvider`]**: every call errors; used when no provider is configured.
//! - **[`GeminiProvider`]**: REST client with retry and backoff.
//!
//! Clients are constructed explicitly and passed into the pipeline as
//! `Arc<dyn …>`, so tests substitute fakes without touching global state.
//!
//! # Retry Strategy
//!
//! [`RetryPolicy`] retries only [`ProviderError::Transient`] errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: `base_delay × 2^(attempt-1)`, exponent capped at 5

mod gemini;

pub use gemini::GeminiProvider;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::RemoteHandle;

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// E.g. `"application/json"` to request structured output.
    pub response_mime_type: Option<String>,
    /// Remote files the model should read alongside the prompt.
    pub attachments: Vec<RemoteHandle>,
}

impl GenerateOptions {
    pub fn new(temperature: f32, max_output_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_output_tokens: Some(max_output_tokens),
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.response_mime_type = Some("application/json".to_string());
        self
    }

    pub fn with_attachment(mut self, handle: RemoteHandle) -> Self {
        self.attachments.push(handle);
        self
    }
}

/// Opaque text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions)
        -> Result<String, ProviderError>;
}

/// Opaque text embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Opaque remote object store for source documents.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Upload a local file. The returned handle may still be `processing`.
    async fn upload(&self, path: &Path, display_name: &str)
        -> Result<RemoteHandle, ProviderError>;

    /// Fetch the current state of a previously uploaded handle.
    async fn get(&self, handle_id: &str) -> Result<RemoteHandle, ProviderError>;
}

/// Capped exponential backoff for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }

    /// Run `op`, retrying transient failures up to `max_retries` times.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::warn!(call = what, attempt, error = %e, "transient provider error");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Transient(format!("{} failed after retries", what))))
    }
}

// ============ Disabled Provider ============

/// A provider that always errors.
///
/// Used when `provider.kind = "disabled"`. The classifier and synthesizer
/// fail soft, so the pipeline still answers with fallbacks.
pub struct DisabledProvider;

#[async_trait]
impl Generator for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

#[async_trait]
impl Embedder for DisabledProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

#[async_trait]
impl FileStore for DisabledProvider {
    async fn upload(&self, _path: &Path, _display_name: &str) -> Result<RemoteHandle, ProviderError> {
        Err(ProviderError::Disabled)
    }

    async fn get(&self, _handle_id: &str) -> Result<RemoteHandle, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

/// The three collaborator roles, usually backed by one client.
#[derive(Clone)]
pub struct ProviderSet {
    pub generator: Arc<dyn Generator>,
    pub embedder: Arc<dyn Embedder>,
    pub file_store: Arc<dyn FileStore>,
}

impl ProviderSet {
    /// Use one value for every role.
    pub fn from_shared<P>(provider: Arc<P>) -> Self
    where
        P: Generator + Embedder + FileStore + 'static,
    {
        Self {
            generator: provider.clone(),
            embedder: provider.clone(),
            file_store: provider,
        }
    }
}

/// Create the configured provider.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"gemini"` | [`GeminiProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if the API key
/// environment variable is not set.
pub fn create_provider(config: &ProviderConfig) -> anyhow::Result<ProviderSet> {
    match config.kind.as_str() {
        "disabled" => Ok(ProviderSet::from_shared(Arc::new(DisabledProvider))),
        "gemini" => Ok(ProviderSet::from_shared(Arc::new(GeminiProvider::new(config)?))),
        other => bail!("Unknown provider: {}", other),
    }
}
